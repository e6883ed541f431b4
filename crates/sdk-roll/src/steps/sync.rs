use std::collections::BTreeMap;

use sdk_roll_macros::Step;
use serde::Deserialize;

use crate::Result;
use crate::executor::CommandSpec;
use crate::steps::StepEnv;

fn default_command() -> Vec<String> {
    vec!["gclient".into(), "sync".into()]
}

fn default_attempts() -> u32 {
    3
}

/// `gclient sync` in the engine checkout, retried on failure.
#[Step(
    id = "sync",
    default_label = "Sync dependencies",
    stamped = true,
    skip_if = "no_update_deps"
)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncStep {
    #[serde(default = "crate::steps::default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    pub env: BTreeMap<String, String>,
}

impl Default for SyncStep {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            command: default_command(),
            attempts: default_attempts(),
            env: BTreeMap::new(),
        }
    }
}

impl SyncStep {
    pub fn commands(cfg: &Self, env: &StepEnv) -> Result<Vec<CommandSpec>> {
        Ok(vec![Self::sync_command(cfg, env)?])
    }

    pub fn sync_command(cfg: &Self, env: &StepEnv) -> Result<CommandSpec> {
        let engine = env.roots.engine()?;
        Ok(env
            .command_in(&cfg.command, engine, &cfg.env)?
            .attempts(cfg.attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigDoc;
    use crate::roots::RollRoots;
    use crate::steps::RollOptions;
    use std::path::{Path, PathBuf};

    #[test]
    fn defaults_to_three_gclient_attempts_in_engine_root() {
        let mut env = StepEnv::new(
            RollRoots::new(None, Some(PathBuf::from("/e/src")), None),
            RollOptions::default(),
        );
        env.manifest_fingerprint = Some("fp".into());
        env.stamp_dir = Some(PathBuf::from("/e/src/out/roll_stamps"));

        let stage = SyncStep::stage(&ConfigDoc::empty(), &env)
            .expect("stage")
            .expect("enabled");
        assert_eq!(stage.label, "Sync dependencies");
        assert!(stage.stamp.is_some());
        assert!(!stage.concurrent);
        let cmd = &stage.commands[0];
        assert_eq!(cmd.argv, vec!["gclient", "sync"]);
        assert_eq!(cmd.attempts, 3);
        assert_eq!(cmd.cwd.as_deref(), Some(Path::new("/e/src")));
    }

    #[test]
    fn no_update_deps_skips_sync() {
        let env = StepEnv::new(
            RollRoots::default(),
            RollOptions {
                no_update_deps: true,
                ..Default::default()
            },
        );
        assert!(SyncStep::stage(&ConfigDoc::empty(), &env).expect("ok").is_none());
    }

    #[test]
    fn configured_command_and_attempts() {
        let doc = ConfigDoc::from_toml_str(
            "<mem>",
            r#"
[steps.sync]
label = "gclient"
command = ["gclient", "sync", "-D", "--with_branch_heads"]
attempts = 5
env = { DEPOT_TOOLS_UPDATE = "0" }
"#,
        )
        .expect("doc");
        let env = StepEnv::new(
            RollRoots::new(None, Some(PathBuf::from("/e")), None),
            RollOptions::default(),
        );
        let stage = SyncStep::stage(&doc, &env).expect("stage").expect("enabled");
        assert_eq!(stage.label, "gclient");
        assert!(stage.stamp.is_none());
        let cmd = &stage.commands[0];
        assert_eq!(cmd.argv[2], "-D");
        assert_eq!(cmd.attempts, 5);
        assert_eq!(cmd.env.get("DEPOT_TOOLS_UPDATE").map(String::as_str), Some("0"));
    }
}
