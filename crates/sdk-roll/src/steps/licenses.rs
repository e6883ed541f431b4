use std::collections::BTreeMap;

use sdk_roll_macros::Step;
use serde::Deserialize;

use crate::Result;
use crate::executor::CommandSpec;
use crate::steps::StepEnv;

/// The script found nothing to update.
pub const LICENSES_UNCHANGED: i32 = 0;
/// The script rewrote license files.
pub const LICENSES_UPDATED: i32 = 1;
/// `dart` or `pub` could not be found.
pub const LICENSES_TOOLING_MISSING: i32 = 127;

fn default_script() -> String {
    "flutter/ci/licenses.sh".into()
}

fn default_output_dir() -> String {
    "out/license_script_output".into()
}

fn default_golden_dir() -> String {
    "flutter/ci/licenses_golden".into()
}

/// Runs the engine license script. Afterwards the roll copies the script's
/// output into the golden directory.
#[Step(id = "licenses", default_label = "Update licenses", skip_if = "no_update_licenses")]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LicensesStep {
    #[serde(default = "crate::steps::default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    #[serde(default = "default_script")]
    pub script: String,
    pub args: Vec<String>,
    /// Both relative to the engine checkout.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_golden_dir")]
    pub golden_dir: String,
    pub env: BTreeMap<String, String>,
}

impl Default for LicensesStep {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            script: default_script(),
            args: Vec::new(),
            output_dir: default_output_dir(),
            golden_dir: default_golden_dir(),
            env: BTreeMap::new(),
        }
    }
}

impl LicensesStep {
    pub fn commands(cfg: &Self, env: &StepEnv) -> Result<Vec<CommandSpec>> {
        let engine = env.roots.engine()?;
        let argv: Vec<String> = std::iter::once(cfg.script.clone())
            .chain(cfg.args.iter().cloned())
            .collect();
        let spec = env
            .command_in(&argv, engine, &cfg.env)?
            .ok_codes([LICENSES_UNCHANGED, LICENSES_UPDATED])
            .hint(
                LICENSES_TOOLING_MISSING,
                "the license script could not run; is the Dart SDK (dart and pub) on PATH?",
            );
        Ok(vec![spec])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigDoc;
    use crate::roots::RollRoots;
    use crate::steps::RollOptions;
    use std::path::PathBuf;

    #[test]
    fn accepts_updates_and_hints_missing_tooling() {
        let env = StepEnv::new(
            RollRoots::new(None, Some(PathBuf::from("/e/src")), None),
            RollOptions::default(),
        );
        let stage = LicensesStep::stage(&ConfigDoc::empty(), &env)
            .expect("stage")
            .expect("enabled");
        let cmd = &stage.commands[0];
        assert_eq!(cmd.program(), "/e/src/flutter/ci/licenses.sh");
        assert!(cmd.accepts(LICENSES_UNCHANGED));
        assert!(cmd.accepts(LICENSES_UPDATED));
        assert!(!cmd.accepts(LICENSES_TOOLING_MISSING));
        assert!(cmd.hints.contains_key(&LICENSES_TOOLING_MISSING));
    }

    #[test]
    fn skipped_by_flag() {
        let env = StepEnv::new(
            RollRoots::default(),
            RollOptions {
                no_update_licenses: true,
                ..Default::default()
            },
        );
        assert!(LicensesStep::stage(&ConfigDoc::empty(), &env).expect("ok").is_none());
    }
}
