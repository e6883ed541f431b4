use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::output::{OutputTail, read_output_stream, sanitize_line};
use crate::planner::{Plan, Stage};

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Exit codes treated as success.
    pub ok_codes: Vec<i32>,
    /// Total number of tries; retries only follow a rejected exit code.
    pub attempts: u32,
    /// Extra text attached to a failure with the given exit code.
    pub hints: BTreeMap<i32, String>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
            ok_codes: vec![0],
            attempts: 1,
            hints: BTreeMap::new(),
        }
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn ok_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.ok_codes = codes.into_iter().collect();
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn hint(mut self, code: i32, text: impl Into<String>) -> Self {
        self.hints.insert(code, text.into());
        self
    }

    pub fn accepts(&self, code: i32) -> bool {
        self.ok_codes.contains(&code)
    }

    /// Shell-style rendering for logs and reports.
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn resolved_cwd(&self, fallback: Option<&Path>) -> PathBuf {
        self.cwd
            .clone()
            .or_else(|| fallback.map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn command(&self, cwd: &Path) -> Result<Command> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(Error::msg("empty command line"));
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd).envs(&self.env);
        Ok(cmd)
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    pub cwd: PathBuf,
    pub exit_code: Option<i32>,
    pub ok: bool,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Output tail, kept for failed commands only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
}

impl CommandOutcome {
    fn pending(command: String, cwd: PathBuf) -> Self {
        Self {
            command,
            cwd,
            exit_code: None,
            ok: false,
            attempts: 0,
            elapsed_ms: 0,
            error: None,
            hint: None,
            output: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Failed,
    /// The stage stamp matched; nothing was run.
    Skipped,
    DryRun,
    /// Never started (fail-fast or cancellation).
    NotRun,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Ok => "ok",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
            StageStatus::DryRun => "dry-run",
            StageStatus::NotRun => "not-run",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub id: String,
    pub label: String,
    pub concurrent: bool,
    pub status: StageStatus,
    pub elapsed_ms: u64,
    pub commands: Vec<CommandOutcome>,
}

impl StageReport {
    fn without_commands(stage: &Stage, status: StageStatus) -> Self {
        Self {
            id: stage.id.clone(),
            label: stage.label.clone(),
            concurrent: stage.concurrent,
            status,
            elapsed_ms: 0,
            commands: Vec::new(),
        }
    }

    pub fn failed(&self) -> bool {
        self.status == StageStatus::Failed
    }

    /// The first rejected command as a `StageCommandFailed` error.
    pub fn failure(&self) -> Option<Error> {
        if !self.failed() {
            return None;
        }
        let cmd = self.commands.iter().find(|c| !c.ok)?;
        let output = match &cmd.error {
            Some(e) => vec![e.clone()],
            None => cmd.output.clone(),
        };
        Some(Error::StageCommandFailed {
            stage: self.id.clone(),
            command: cmd.command.clone(),
            cwd: cmd.cwd.clone(),
            exit_code: cmd.exit_code,
            output,
            hint: cmd.hint.clone(),
        })
    }

    pub fn into_result(self) -> Result<Self> {
        match self.failure() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn stage(&self, id: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn ok(&self) -> bool {
        !self.cancelled && self.stages.iter().all(|s| !s.failed())
    }

    pub fn first_failure(&self) -> Option<Error> {
        self.stages.iter().find_map(StageReport::failure)
    }

    /// First failed stage wins over cancellation.
    pub fn into_result(self) -> Result<Self> {
        if let Some(e) = self.first_failure() {
            return Err(e);
        }
        if self.cancelled {
            return Err(Error::Cancelled);
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailPolicy {
    /// Stop after the first failed stage.
    FailFast,
    /// Run every stage and report failures at the end.
    #[default]
    Continue,
}

#[derive(Debug, Clone)]
pub enum ExecEvent {
    StageStarted {
        id: String,
        label: String,
        commands: usize,
        concurrent: bool,
    },
    StageSkipped {
        id: String,
        reason: String,
    },
    CommandStarted {
        stage: String,
        command: String,
    },
    CommandLog {
        stage: String,
        line: String,
    },
    CommandFinished {
        stage: String,
        command: String,
        ok: bool,
        exit_code: Option<i32>,
        elapsed_ms: u64,
    },
    StageFinished {
        id: String,
        status: StageStatus,
        elapsed_ms: u64,
    },
    PipelineDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    stages_started: usize,
    stages_ok: usize,
    stages_failed: usize,
    stages_skipped: usize,
    commands_run: usize,
    log_lines: usize,
    failed_stages: Vec<String>,
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::StageStarted {
                id,
                label,
                commands,
                concurrent,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    s.stages_started += 1;
                    s.started_at.get_or_insert_with(Instant::now);
                }
                let mode = if concurrent { "concurrent" } else { "sequential" };
                println!("STAGE: {id} ({label}) [{commands} {mode}]");
            }
            ExecEvent::StageSkipped { id, reason } => {
                if let Ok(mut s) = self.state.lock() {
                    s.stages_skipped += 1;
                }
                println!("SKIP: {id} ({reason})");
            }
            ExecEvent::CommandStarted { stage, command } => {
                if let Ok(mut s) = self.state.lock() {
                    s.commands_run += 1;
                }
                println!("RUN: [{stage}] {command}");
            }
            ExecEvent::CommandLog { stage, line } => {
                if let Ok(mut s) = self.state.lock() {
                    s.log_lines += 1;
                }
                println!("[{stage}] {line}");
            }
            ExecEvent::CommandFinished {
                stage,
                command,
                ok,
                exit_code,
                elapsed_ms,
            } => {
                let code = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
                if ok {
                    println!("DONE: [{stage}] {command} ({elapsed_ms}ms)");
                } else {
                    println!("FAIL: [{stage}] {command} (exit {code}, {elapsed_ms}ms)");
                }
            }
            ExecEvent::StageFinished {
                id,
                status,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    match status {
                        StageStatus::Failed => {
                            s.stages_failed += 1;
                            s.failed_stages.push(id.clone());
                        }
                        _ => s.stages_ok += 1,
                    }
                }
                println!("{}: {id} ({elapsed_ms}ms)", status.as_str().to_uppercase());
            }
            ExecEvent::PipelineDone { ok, error } => {
                let mut summary = String::from("SUMMARY:\n");
                if let Ok(mut s) = self.state.lock() {
                    let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                    summary.push_str(&format!("  status: {}\n", if ok { "ok" } else { "failed" }));
                    summary.push_str(&format!(
                        "  stages: started={} ok={} failed={} skipped={}\n",
                        s.stages_started, s.stages_ok, s.stages_failed, s.stages_skipped
                    ));
                    summary.push_str(&format!("  commands: {}\n", s.commands_run));
                    summary.push_str(&format!("  logs: {}\n", s.log_lines));
                    summary.push_str(&format!(
                        "  elapsed: {}\n",
                        format_elapsed_hms(wall.as_secs())
                    ));
                    if !s.failed_stages.is_empty() {
                        summary.push_str(&format!("  failed_stages: {}\n", s.failed_stages.join(", ")));
                    }
                    *s = StdoutSinkState::default();
                }
                if let Some(e) = error.filter(|_| !ok) {
                    summary.push_str(&format!("  error: {e}\n"));
                }
                print!("{summary}");
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

/// Runs pipeline stages in order.
///
/// Setting the cancel token stops any further stage from starting; commands
/// that are already running are left to finish.
#[derive(Clone)]
pub struct Executor {
    pub dry_run: bool,
    pub policy: FailPolicy,
    pub cancel: Arc<AtomicBool>,
    pub sink: Arc<dyn ExecSink>,
}

impl Executor {
    pub fn new(sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run: false,
            policy: FailPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_policy(mut self, policy: FailPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn run(&self, plan: &Plan) -> PipelineReport {
        let mut report = PipelineReport::default();
        let mut halted = false;

        for stage in plan.stages() {
            if self.cancelled() {
                report.cancelled = true;
            }
            if report.cancelled || halted {
                let reason = if report.cancelled {
                    "cancelled"
                } else {
                    "an earlier stage failed"
                };
                self.sink.emit(ExecEvent::StageSkipped {
                    id: stage.id.clone(),
                    reason: reason.into(),
                });
                report
                    .stages
                    .push(StageReport::without_commands(stage, StageStatus::NotRun));
                continue;
            }

            let stage_report = self.run_stage(stage);
            if stage_report.failed() && self.policy == FailPolicy::FailFast {
                halted = true;
            }
            report.stages.push(stage_report);
        }

        let error = report
            .first_failure()
            .map(|e| e.to_string())
            .or_else(|| report.cancelled.then(|| "cancelled".to_string()));
        self.sink.emit(ExecEvent::PipelineDone {
            ok: error.is_none(),
            error,
        });
        report
    }

    /// Runs one stage to completion. A sequential stage stops at its first
    /// rejected command; a concurrent stage always joins every command.
    pub fn run_stage(&self, stage: &Stage) -> StageReport {
        if let Some(guard) = &stage.stamp
            && !self.dry_run
            && guard.is_fresh()
        {
            self.sink.emit(ExecEvent::StageSkipped {
                id: stage.id.clone(),
                reason: "stamp is up to date".into(),
            });
            return StageReport::without_commands(stage, StageStatus::Skipped);
        }

        let start = Instant::now();
        self.sink.emit(ExecEvent::StageStarted {
            id: stage.id.clone(),
            label: stage.label.clone(),
            commands: stage.commands.len(),
            concurrent: stage.concurrent,
        });

        let commands: Vec<CommandOutcome> = if self.dry_run {
            stage
                .commands
                .iter()
                .map(|spec| self.dry_run_command(stage, spec))
                .collect()
        } else if stage.concurrent && stage.commands.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = stage
                    .commands
                    .iter()
                    .map(|spec| scope.spawn(move || self.run_command(stage, spec)))
                    .collect();
                handles
                    .into_iter()
                    .zip(&stage.commands)
                    .map(|(h, spec)| {
                        h.join().unwrap_or_else(|_| {
                            let mut o = CommandOutcome::pending(
                                spec.display(),
                                spec.resolved_cwd(stage.working_dir.as_deref()),
                            );
                            o.error = Some("command runner panicked".into());
                            o
                        })
                    })
                    .collect()
            })
        } else {
            let mut out = Vec::with_capacity(stage.commands.len());
            for spec in &stage.commands {
                let outcome = self.run_command(stage, spec);
                let ok = outcome.ok;
                out.push(outcome);
                if !ok {
                    break;
                }
            }
            out
        };

        let status = if self.dry_run {
            StageStatus::DryRun
        } else if commands.iter().all(|c| c.ok) {
            StageStatus::Ok
        } else {
            StageStatus::Failed
        };

        if status == StageStatus::Ok
            && let Some(guard) = &stage.stamp
            && let Err(e) = guard.record()
        {
            warn!(stage = %stage.id, error = %e, "failed to record stage stamp");
        }

        let elapsed_ms = elapsed_ms(start);
        self.sink.emit(ExecEvent::StageFinished {
            id: stage.id.clone(),
            status,
            elapsed_ms,
        });
        StageReport {
            id: stage.id.clone(),
            label: stage.label.clone(),
            concurrent: stage.concurrent,
            status,
            elapsed_ms,
            commands,
        }
    }

    fn log(&self, stage: &Stage, line: String) {
        self.sink.emit(ExecEvent::CommandLog {
            stage: stage.id.clone(),
            line,
        });
    }

    fn dry_run_command(&self, stage: &Stage, spec: &CommandSpec) -> CommandOutcome {
        let cwd = spec.resolved_cwd(stage.working_dir.as_deref());
        let display = spec.display();
        self.log(
            stage,
            format!("DRY-RUN: {display} (in {})", cwd.display()),
        );
        let mut outcome = CommandOutcome::pending(display, cwd);
        outcome.ok = true;
        outcome
    }

    fn run_command(&self, stage: &Stage, spec: &CommandSpec) -> CommandOutcome {
        let cwd = spec.resolved_cwd(stage.working_dir.as_deref());
        let shown = spec.display();
        let start = Instant::now();
        debug!(stage = %stage.id, command = %shown, cwd = %cwd.display(), "spawning");
        self.sink.emit(ExecEvent::CommandStarted {
            stage: stage.id.clone(),
            command: shown.clone(),
        });

        let mut outcome = CommandOutcome::pending(shown.clone(), cwd.clone());
        let attempts = spec.attempts.max(1);
        for attempt in 1..=attempts {
            outcome.attempts = attempt;
            match self.spawn_and_stream(stage, spec, &cwd) {
                Ok((code, tail)) => {
                    outcome.exit_code = code;
                    outcome.ok = code.is_some_and(|c| spec.accepts(c));
                    outcome.output = if outcome.ok { Vec::new() } else { tail };
                }
                Err(e) => {
                    outcome.error = Some(e.to_string());
                    break;
                }
            }
            if outcome.ok || attempt == attempts || self.cancelled() {
                break;
            }
            let code = outcome
                .exit_code
                .map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}"));
            self.log(
                stage,
                format!("attempt {attempt}/{attempts} failed ({code}), retrying"),
            );
        }

        if !outcome.ok {
            outcome.hint = outcome.exit_code.and_then(|c| spec.hints.get(&c).cloned());
        }
        outcome.elapsed_ms = elapsed_ms(start);
        self.sink.emit(ExecEvent::CommandFinished {
            stage: stage.id.clone(),
            command: shown,
            ok: outcome.ok,
            exit_code: outcome.exit_code,
            elapsed_ms: outcome.elapsed_ms,
        });
        outcome
    }

    // Streams combined stdout/stderr to the sink and returns the exit code plus output tail.
    fn spawn_and_stream(
        &self,
        stage: &Stage,
        spec: &CommandSpec,
        cwd: &Path,
    ) -> Result<(Option<i32>, Vec<String>)> {
        let mut child = spec
            .command(cwd)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::msg(format!(
                    "failed to spawn `{}` in {}: {e}",
                    spec.program(),
                    cwd.display()
                ))
            })?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(err, tx));
        }
        drop(tx);

        let mut tail = OutputTail::default();
        for line in rx {
            let line = sanitize_line(&line);
            if line.is_empty() {
                continue;
            }
            self.log(stage, line.clone());
            tail.push(line);
        }

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait failed for `{}`: {e}", spec.program())))?;
        Ok((status.code(), tail.into_lines()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self, spec: &CommandSpec) -> bool {
        self.exit_code.is_some_and(|c| spec.accepts(c))
    }

    pub fn stderr_lines(&self) -> Vec<String> {
        let mut tail = OutputTail::default();
        for line in self.stderr.lines() {
            let line = sanitize_line(line);
            if !line.is_empty() {
                tail.push(line);
            }
        }
        tail.into_lines()
    }
}

/// Runs `spec` to completion with stdout kept verbatim. Only a failure to
/// start the process is an error; callers judge the exit code.
pub fn capture(spec: &CommandSpec, fallback_cwd: Option<&Path>) -> Result<CapturedOutput> {
    let cwd = spec.resolved_cwd(fallback_cwd);
    debug!(command = %spec.display(), cwd = %cwd.display(), "capturing");
    let out = spec
        .command(&cwd)?
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            Error::msg(format!(
                "failed to spawn `{}` in {}: {e}",
                spec.program(),
                cwd.display()
            ))
        })?;
    Ok(CapturedOutput {
        exit_code: out.status.code(),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn format_elapsed_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
