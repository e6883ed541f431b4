//! The roll itself: patch the manifest, run the pipeline, then commit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::executor::{self, CommandSpec, Executor, PipelineReport, StageReport, StageStatus};
use crate::fsutil;
use crate::manifest::{self, FieldMarker, Manifest, ManifestConfig, PrefixGroup};
use crate::planner::{Plan, Stage};
use crate::revlog::{self, LogQuery, RevisionPair};
use crate::roots::{RollRoots, RootOverrides};
use crate::steps::licenses::LicensesStep;
use crate::steps::sync::SyncStep;
use crate::steps::{self, RollOptions, StepEnv};

pub const COMMIT_STAGE_ID: &str = "commit";

fn default_subject() -> String {
    "Dart SDK roll".into()
}

fn default_vcs() -> String {
    "git".into()
}

fn default_log_args() -> Vec<String> {
    vec!["--oneline".into()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_vcs")]
    pub vcs: String,
    #[serde(default = "default_log_args")]
    pub log_args: Vec<String>,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            vcs: default_vcs(),
            log_args: default_log_args(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestUpdate {
    pub path: PathBuf,
    pub revisions: RevisionPair,
    pub patched_line: usize,
    pub block_lines: usize,
    pub persisted: bool,
    pub fingerprint: String,
    /// The sync run against the patched manifest, before regeneration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_sync: Option<StageReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollReport {
    pub target_revision: String,
    pub dry_run: bool,
    pub manifest: Option<ManifestUpdate>,
    pub pipeline: PipelineReport,
    pub licenses_copied: Vec<PathBuf>,
    pub commit: Option<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_skipped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: String,
}

impl RollReport {
    pub fn revisions(&self) -> Option<&RevisionPair> {
        self.manifest.as_ref().map(|m| &m.revisions)
    }
}

/// Runs a full roll to `options.target_revision`.
///
/// The report is written (when `[report].path` is set) before any pipeline or
/// commit failure is returned.
pub fn run(
    doc: &ConfigDoc,
    options: &RollOptions,
    overrides: &RootOverrides,
    executor: &Executor,
) -> Result<RollReport> {
    revlog::validate_revision(&options.target_revision)?;
    let roots = RollRoots::resolve(doc, overrides)?;

    info!(revision = %options.target_revision, dry_run = options.dry_run, "starting roll");

    let mut env = StepEnv::new(roots.clone(), options.clone());
    let update = if options.no_update_deps {
        info!("skipping manifest update");
        None
    } else {
        let (update, fingerprint) = update_manifest(doc, &env, executor)?;
        env.manifest_fingerprint = Some(fingerprint);
        Some(update)
    };
    env.stamp_dir = roots.stamp_dir().ok();

    let plan = steps::build_plan(doc, &env)?;
    info!(stages = %plan.ids().join(","), "running pipeline");
    let pipeline = executor.run(&plan);

    let mut report = RollReport {
        target_revision: options.target_revision.clone(),
        dry_run: options.dry_run,
        manifest: update,
        pipeline,
        licenses_copied: Vec::new(),
        commit: None,
        commit_skipped: None,
        error: None,
        finished_at: String::new(),
    };

    let outcome = finish(doc, &env, executor, &mut report);
    report.error = outcome.as_ref().err().map(|e| e.to_string());
    report.finished_at = chrono::Utc::now().to_rfc3339();
    write_report(doc, &report)?;
    outcome.map(|()| report)
}

// Everything after the pipeline: license copy, then the optional commit.
fn finish(
    doc: &ConfigDoc,
    env: &StepEnv,
    executor: &Executor,
    report: &mut RollReport,
) -> Result<()> {
    report.pipeline.clone().into_result()?;

    if report
        .pipeline
        .stage(LicensesStep::ID)
        .is_some_and(|s| s.status == StageStatus::Ok)
    {
        report.licenses_copied = copy_golden_licenses(doc, &env.roots)?;
    }

    if !env.options.create_commit {
        return Ok(());
    }
    let Some(revisions) = report.revisions().cloned() else {
        let reason = "no original revision is known (manifest update was skipped)";
        warn!("skipping commit: {reason}");
        report.commit_skipped = Some(reason.into());
        return Ok(());
    };

    let stage = commit_stage(doc, &env.roots, &revisions, revlog::today())?;
    let commit = executor.run_stage(&stage);
    report.commit = Some(commit.clone());
    commit.into_result()?;
    info!(range = %revisions.range(), "roll committed");
    Ok(())
}

/// Patches the revision field, splices in the regenerated dependency block and
/// persists the manifest. Returns the update summary and the manifest fingerprint.
///
/// With `sync_before_generate` the patched manifest is written and synced
/// before the generator runs. If sync, generation or the splice then fails,
/// the original manifest text is written back.
pub fn update_manifest(
    doc: &ConfigDoc,
    env: &StepEnv,
    executor: &Executor,
) -> Result<(ManifestUpdate, String)> {
    let cfg: ManifestConfig = doc.deserialize_path("manifest")?.unwrap_or_default();
    let path = env.roots.under_engine(&cfg.path)?;
    let marker = FieldMarker::new(&cfg.revision_field)?;
    let target = &env.options.target_revision;

    let mut manifest = Manifest::load(&path)?;
    let pristine = manifest.clone();
    let patch = manifest.patch_field(&marker, target)?;
    info!(
        field = marker.name(),
        original = %patch.original,
        updated = %patch.updated,
        "patched revision field"
    );

    // The generator reads the SDK checkout, so it must see the new revision synced.
    let early_sync = cfg.sync_before_generate && !env.options.dry_run;
    if early_sync {
        manifest.persist()?;
    }
    let (pre_sync, block) = match regenerate(doc, env, executor, &cfg, &mut manifest, early_sync) {
        Ok(done) => done,
        Err(e) => {
            if early_sync {
                restore(&pristine);
            }
            return Err(e);
        }
    };

    let persisted = !env.options.dry_run;
    if persisted {
        manifest.persist()?;
        info!(path = %path.display(), lines = block.len(), "manifest updated");
    } else {
        info!(
            path = %path.display(),
            lines = block.len(),
            "dry run: manifest update computed, not written"
        );
    }

    let fingerprint = manifest.fingerprint();
    Ok((
        ManifestUpdate {
            path,
            revisions: RevisionPair::new(patch.original, patch.updated),
            patched_line: patch.index + 1,
            block_lines: block.len(),
            persisted,
            fingerprint: fingerprint.clone(),
            pre_sync,
        },
        fingerprint,
    ))
}

// Optional sync against the patched manifest, then generate and splice.
fn regenerate(
    doc: &ConfigDoc,
    env: &StepEnv,
    executor: &Executor,
    cfg: &ManifestConfig,
    manifest: &mut Manifest,
    sync_first: bool,
) -> Result<(Option<StageReport>, Vec<String>)> {
    let pre_sync = if sync_first {
        let sync_cfg = SyncStep::load(doc)?;
        let stage = Stage::new(
            SyncStep::ID,
            "Sync before regenerating dependencies",
            vec![SyncStep::sync_command(&sync_cfg, env)?],
        );
        Some(executor.run_stage(&stage).into_result()?)
    } else {
        None
    };

    let engine = env.roots.engine()?;
    let marker = FieldMarker::new(&cfg.revision_field)?;
    let generator = env.command_in(&[cfg.generator.clone()], engine, &BTreeMap::new())?;
    let block = generate_block(&generator)?;
    manifest.splice_block(&marker, &block, &PrefixGroup::new(&cfg.group_prefix))?;
    Ok((pre_sync, block))
}

fn restore(pristine: &Manifest) {
    match pristine.persist() {
        Ok(()) => info!(path = %pristine.origin().display(), "restored manifest after failed update"),
        Err(e) => warn!(
            path = %pristine.origin().display(),
            error = %e,
            "failed to restore manifest; it still holds the patched revision"
        ),
    }
}

fn generate_block(spec: &CommandSpec) -> Result<Vec<String>> {
    let out = executor::capture(spec, None)?;
    if !out.success(spec) {
        return Err(Error::StageCommandFailed {
            stage: "generate".into(),
            command: spec.display(),
            cwd: spec.resolved_cwd(None),
            exit_code: out.exit_code,
            output: out.stderr_lines(),
            hint: None,
        });
    }
    Ok(manifest::block_lines(&out.stdout))
}

/// Builds the final commit stage; the message embeds the upstream log for the
/// rolled range.
pub fn commit_stage(
    doc: &ConfigDoc,
    roots: &RollRoots,
    revisions: &RevisionPair,
    date: chrono::NaiveDate,
) -> Result<Stage> {
    let cfg: CommitConfig = doc.deserialize_path("commit")?.unwrap_or_default();
    let mut query = LogQuery::new(&cfg.vcs, roots.dart_sdk()?);
    query.args = cfg.log_args.clone();
    let log = query.run(revisions)?;
    let message = revlog::commit_message(&cfg.subject, date, &log);

    let commit = CommandSpec::new([cfg.vcs.as_str(), "commit", "-a", "-m", message.as_str()])
        .cwd(roots.engine_flutter()?);
    Ok(Stage::new(COMMIT_STAGE_ID, "Commit roll", vec![commit]))
}

/// Copies the license script output into the golden directory.
pub fn copy_golden_licenses(doc: &ConfigDoc, roots: &RollRoots) -> Result<Vec<PathBuf>> {
    let cfg = LicensesStep::load(doc)?;
    let src = roots.under_engine(&cfg.output_dir)?;
    let dst = roots.under_engine(&cfg.golden_dir)?;
    if !src.is_dir() {
        warn!(dir = %src.display(), "license script output not found; nothing copied");
        return Ok(Vec::new());
    }
    let copied = fsutil::copy_top_level_files(&src, &dst)?;
    info!(count = copied.len(), golden = %dst.display(), "copied golden licenses");
    Ok(copied)
}

/// The stages `run` would execute, without touching the manifest.
pub fn plan(doc: &ConfigDoc, options: &RollOptions, overrides: &RootOverrides) -> Result<Plan> {
    revlog::validate_revision(&options.target_revision)?;
    let roots = RollRoots::resolve(doc, overrides)?;
    let mut env = StepEnv::new(roots.clone(), options.clone());
    env.stamp_dir = roots.stamp_dir().ok();
    steps::build_plan(doc, &env)
}

fn write_report(doc: &ConfigDoc, report: &RollReport) -> Result<()> {
    let cfg: ReportConfig = doc.deserialize_path("report")?.unwrap_or_default();
    let Some(raw) = cfg.path.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    let path = Path::new(raw);
    fsutil::write_json_pretty(path, report)?;
    info!(path = %path.display(), "wrote roll report");
    Ok(())
}
