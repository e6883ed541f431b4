#![cfg(unix)]

use std::sync::{Arc, mpsc};

use sdk_roll::error::Error;
use sdk_roll::executor::{ChannelSink, CommandSpec, ExecEvent, Executor, FailPolicy, StageStatus};
use sdk_roll::planner::{Plan, Stage};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new(["sh", "-c", script])
}

fn two_stage_plan(dir: &std::path::Path) -> Plan {
    let mut plan = Plan::default();
    plan.add(
        Stage::new(
            "first",
            "Build both halves",
            vec![sh("echo left && exit 0"), sh("sleep 0.2; echo right >&2; exit 1")],
        )
        .concurrent(true)
        .working_dir(dir),
    )
    .expect("add first");
    plan.add(Stage::new("second", "Touch marker", vec![sh("touch second.ran")]).working_dir(dir))
        .expect("add second");
    plan
}

fn executor(policy: FailPolicy) -> (Executor, mpsc::Receiver<ExecEvent>) {
    let (tx, rx) = mpsc::channel();
    let exec = Executor::new(Arc::new(ChannelSink::new(tx))).with_policy(policy);
    (exec, rx)
}

#[test]
fn fail_fast_stops_after_the_failed_stage_is_joined() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let plan = two_stage_plan(tmp.path());
    let (exec, rx) = executor(FailPolicy::FailFast);

    let report = exec.run(&plan);
    drop(exec);

    let first = report.stage("first").expect("first");
    assert_eq!(first.status, StageStatus::Failed);
    // Both commands were awaited even though one failed.
    assert_eq!(first.commands.len(), 2);
    assert!(first.commands[0].ok);
    assert!(!first.commands[1].ok);
    assert_eq!(first.commands[1].exit_code, Some(1));
    assert!(
        first.commands[1].output.iter().any(|l| l == "right"),
        "{:?}",
        first.commands[1].output
    );

    assert_eq!(report.stage("second").expect("second").status, StageStatus::NotRun);
    assert!(!tmp.path().join("second.ran").exists());

    match report.into_result().unwrap_err() {
        Error::StageCommandFailed {
            stage, exit_code, ..
        } => {
            assert_eq!(stage, "first");
            assert_eq!(exit_code, Some(1));
        }
        other => panic!("unexpected {other:?}"),
    }

    let events: Vec<ExecEvent> = rx.iter().collect();
    assert!(events.iter().any(|e| matches!(
        e,
        ExecEvent::StageSkipped { id, .. } if id == "second"
    )));
    assert!(matches!(events.last(), Some(ExecEvent::PipelineDone { ok: false, .. })));
}

#[test]
fn continue_runs_later_stages_and_still_reports_the_first_failure() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let plan = two_stage_plan(tmp.path());
    let (exec, rx) = executor(FailPolicy::Continue);

    let report = exec.run(&plan);
    drop(exec);

    assert_eq!(report.stage("first").expect("first").status, StageStatus::Failed);
    assert_eq!(report.stage("second").expect("second").status, StageStatus::Ok);
    assert!(tmp.path().join("second.ran").exists());
    assert!(!report.ok());

    let err = report.first_failure().expect("failure");
    assert!(matches!(&err, Error::StageCommandFailed { stage, .. } if stage == "first"));

    // The second stage starts only after every command of the first finished.
    let events: Vec<ExecEvent> = rx.iter().collect();
    let second_started = events
        .iter()
        .position(|e| matches!(e, ExecEvent::StageStarted { id, .. } if id == "second"))
        .expect("second started");
    let first_finished: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, ExecEvent::CommandFinished { stage, .. } if stage == "first"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(first_finished.len(), 2);
    assert!(first_finished.iter().all(|i| *i < second_started));
}

#[test]
fn cancel_before_run_starts_nothing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let plan = two_stage_plan(tmp.path());
    let (exec, _rx) = executor(FailPolicy::FailFast);
    exec.cancel_token()
        .store(true, std::sync::atomic::Ordering::Relaxed);

    let report = exec.run(&plan);
    assert!(report.cancelled);
    assert!(report.stages.iter().all(|s| s.status == StageStatus::NotRun));
    assert!(matches!(report.into_result(), Err(Error::Cancelled)));
}

#[test]
fn dry_run_spawns_nothing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let plan = two_stage_plan(tmp.path());
    let (exec, _rx) = executor(FailPolicy::FailFast);
    let exec = exec.with_dry_run(true);

    let report = exec.run(&plan);
    assert!(report.ok());
    assert!(report.stages.iter().all(|s| s.status == StageStatus::DryRun));
    assert!(!tmp.path().join("second.ran").exists());
}
