use std::collections::BTreeMap;

use sdk_roll_macros::Step;
use serde::Deserialize;

use crate::Result;
use crate::executor::CommandSpec;
use crate::steps::StepEnv;

fn default_program() -> String {
    "flutter".into()
}

fn default_args() -> Vec<String> {
    vec!["test".into(), "--coverage".into()]
}

fn default_local_engine() -> String {
    "host_debug_unopt".into()
}

fn default_packages() -> Vec<String> {
    vec!["packages/flutter".into(), "examples/flutter_gallery".into()]
}

/// Framework tests against the freshly built host engine, one package at a time.
#[Step(id = "test", default_label = "Run framework tests", skip_if = "no_test")]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TestStep {
    #[serde(default = "crate::steps::default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_local_engine")]
    pub local_engine: String,
    /// Package directories relative to the framework checkout.
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for TestStep {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            program: default_program(),
            args: default_args(),
            local_engine: default_local_engine(),
            packages: default_packages(),
            env: BTreeMap::new(),
        }
    }
}

impl TestStep {
    pub fn commands(cfg: &Self, env: &StepEnv) -> Result<Vec<CommandSpec>> {
        let flutter = env.roots.flutter()?;
        let mut argv = vec![cfg.program.clone()];
        argv.extend(cfg.args.iter().cloned());
        if !cfg.local_engine.trim().is_empty() {
            argv.push(format!("--local-engine={}", cfg.local_engine.trim()));
        }
        cfg.packages
            .iter()
            .map(|pkg| -> Result<CommandSpec> {
                Ok(env.command_in(&argv, flutter, &cfg.env)?.cwd(flutter.join(pkg)))
            })
            .collect()
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
    fn runs_in_framework_and_gallery() {
        let env = StepEnv::new(
            RollRoots::new(Some(PathBuf::from("/f")), None, None),
            RollOptions::default(),
        );
        let stage = TestStep::stage(&ConfigDoc::empty(), &env)
            .expect("stage")
            .expect("enabled");
        assert_eq!(stage.commands.len(), 2);
        for cmd in &stage.commands {
            assert_eq!(
                cmd.argv,
                vec!["flutter", "test", "--coverage", "--local-engine=host_debug_unopt"]
            );
        }
        assert_eq!(stage.commands[0].cwd.as_deref(), Some(Path::new("/f/packages/flutter")));
        assert_eq!(
            stage.commands[1].cwd.as_deref(),
            Some(Path::new("/f/examples/flutter_gallery"))
        );
    }

    #[test]
    fn missing_flutter_root_fails() {
        let env = StepEnv::new(RollRoots::default(), RollOptions::default());
        let err = TestStep::stage(&ConfigDoc::empty(), &env).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_MISSING_ROOTS);
    }
}
