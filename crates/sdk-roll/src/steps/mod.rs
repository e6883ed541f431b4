use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::executor::CommandSpec;
use crate::planner::Plan;
use crate::roots::RollRoots;
use crate::stamp::{StampCache, StampGuard};

pub mod build;
pub mod gn;
pub mod hot_reload;
pub mod licenses;
pub mod sync;
pub mod test;

/// Pipeline step ids in run order (the commit stage is appended by the roll).
pub const STEP_IDS: [&str; 6] = [
    sync::SyncStep::ID,
    gn::GnStep::ID,
    build::BuildStep::ID,
    test::TestStep::ID,
    hot_reload::HotReloadStep::ID,
    licenses::LicensesStep::ID,
];

pub(crate) fn default_true() -> bool {
    true
}

/// What the user asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct RollOptions {
    pub target_revision: String,
    pub create_commit: bool,
    pub no_update_deps: bool,
    pub no_build: bool,
    pub no_test: bool,
    pub no_hot_reload: bool,
    pub no_update_licenses: bool,
    pub dry_run: bool,
    pub keep_going: bool,
    /// Ignore stage stamps and always run stamped stages.
    pub force_sync: bool,
}

/// Inputs every step sees while building its stage.
#[derive(Debug, Clone)]
pub struct StepEnv {
    pub roots: RollRoots,
    pub options: RollOptions,
    /// Fingerprint of the manifest the pipeline will run against.
    pub manifest_fingerprint: Option<String>,
    pub stamp_dir: Option<PathBuf>,
}

impl StepEnv {
    pub fn new(roots: RollRoots, options: RollOptions) -> Self {
        Self {
            roots,
            options,
            manifest_fingerprint: None,
            stamp_dir: None,
        }
    }

    pub fn stamp_guard(&self, id: &str) -> Option<StampGuard> {
        if self.options.force_sync {
            return None;
        }
        let fingerprint = self.manifest_fingerprint.as_ref()?;
        let dir = self.stamp_dir.as_ref()?;
        Some(StampGuard::new(
            StampCache::new(dir.join(format!("{id}.stamp"))),
            fingerprint.clone(),
        ))
    }

    /// Builds a command whose relative program path (one containing `/`) is
    /// resolved against `base`; bare names are left for `PATH` lookup.
    pub fn command_in(
        &self,
        argv: &[String],
        base: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandSpec> {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::msg("step command must not be empty"));
        };
        let program = program.trim();
        if program.is_empty() {
            return Err(Error::msg("step command program must not be empty"));
        }
        let resolved = if program.contains('/') && !Path::new(program).is_absolute() {
            base.join(program).display().to_string()
        } else {
            program.to_string()
        };
        let mut spec = CommandSpec::new(std::iter::once(resolved).chain(args.iter().cloned()))
            .cwd(base);
        spec.env = env.clone();
        Ok(spec)
    }
}

/// Plans every enabled pipeline step in declaration order.
pub fn build_plan(doc: &ConfigDoc, env: &StepEnv) -> Result<Plan> {
    let mut plan = Plan::default();
    sync::SyncStep::plan(doc, env, &mut plan)?;
    gn::GnStep::plan(doc, env, &mut plan)?;
    build::BuildStep::plan(doc, env, &mut plan)?;
    test::TestStep::plan(doc, env, &mut plan)?;
    hot_reload::HotReloadStep::plan(doc, env, &mut plan)?;
    licenses::LicensesStep::plan(doc, env, &mut plan)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> StepEnv {
        StepEnv::new(
            RollRoots::new(
                Some(PathBuf::from("/f")),
                Some(PathBuf::from("/e/src")),
                Some(PathBuf::from("/d")),
            ),
            RollOptions::default(),
        )
    }

    #[test]
    fn relative_programs_resolve_against_base() {
        let e = env();
        let none = BTreeMap::new();
        let spec = e
            .command_in(
                &["flutter/tools/gn".to_string(), "--goma".to_string()],
                Path::new("/e/src"),
                &none,
            )
            .expect("spec");
        assert_eq!(spec.argv, vec!["/e/src/flutter/tools/gn", "--goma"]);
        assert_eq!(spec.cwd.as_deref(), Some(Path::new("/e/src")));

        let spec = e
            .command_in(&["ninja".to_string()], Path::new("/e/src"), &none)
            .expect("spec");
        assert_eq!(spec.argv, vec!["ninja"]);
        assert!(e.command_in(&[], Path::new("/"), &none).is_err());
        assert!(e.command_in(&[" ".to_string()], Path::new("/"), &none).is_err());
    }

    #[test]
    fn stamp_guard_needs_dir_and_fingerprint() {
        let mut e = env();
        assert!(e.stamp_guard("sync").is_none());
        e.manifest_fingerprint = Some("fp".into());
        e.stamp_dir = Some(PathBuf::from("/e/src/out/roll_stamps"));
        let guard = e.stamp_guard("sync").expect("guard");
        assert_eq!(
            guard.cache.stamp_path(),
            Path::new("/e/src/out/roll_stamps/sync.stamp")
        );
        assert_eq!(guard.fingerprint, "fp");
        e.options.force_sync = true;
        assert!(e.stamp_guard("sync").is_none());
    }

    #[test]
    fn default_plan_has_every_step_in_order() {
        let plan = build_plan(&ConfigDoc::empty(), &env()).expect("plan");
        assert_eq!(plan.ids(), STEP_IDS.to_vec());
    }

    #[test]
    fn skip_flags_and_disabled_sections_drop_stages() {
        let mut e = env();
        e.options.no_build = true;
        e.options.no_hot_reload = true;
        let doc = ConfigDoc::from_toml_str(
            "<mem>",
            r#"
[steps.licenses]
enabled = false
"#,
        )
        .expect("doc");
        let plan = build_plan(&doc, &e).expect("plan");
        assert_eq!(plan.ids(), vec!["sync", "test"]);
    }
}
