use std::collections::BTreeMap;

use sdk_roll_macros::Step;
use serde::Deserialize;

use crate::Result;
use crate::executor::CommandSpec;
use crate::steps::StepEnv;

fn default_program() -> String {
    "flutter".into()
}

fn default_app_dir() -> String {
    "examples/flutter_gallery".into()
}

fn default_runs() -> Vec<Vec<String>> {
    vec![
        vec![
            "run".into(),
            "--release".into(),
            "--local-engine=android_release".into(),
        ],
        vec!["run".into(), "--local-engine=android_debug_unopt".into()],
    ]
}

#[Step(id = "hot_reload", default_label = "Launch gallery", skip_if = "no_hot_reload")]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotReloadStep {
    #[serde(default = "crate::steps::default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    #[serde(default = "default_program")]
    pub program: String,
    /// App directory relative to the framework checkout.
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    /// One argument list per launch, in order.
    #[serde(default = "default_runs")]
    pub runs: Vec<Vec<String>>,
    pub env: BTreeMap<String, String>,
}

impl Default for HotReloadStep {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            program: default_program(),
            app_dir: default_app_dir(),
            runs: default_runs(),
            env: BTreeMap::new(),
        }
    }
}

impl HotReloadStep {
    pub fn commands(cfg: &Self, env: &StepEnv) -> Result<Vec<CommandSpec>> {
        let flutter = env.roots.flutter()?;
        let app = flutter.join(&cfg.app_dir);
        cfg.runs
            .iter()
            .map(|args| -> Result<CommandSpec> {
                let argv: Vec<String> = std::iter::once(cfg.program.clone())
                    .chain(args.iter().cloned())
                    .collect();
                Ok(env.command_in(&argv, flutter, &cfg.env)?.cwd(&app))
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
    fn release_then_debug_launch() {
        let env = StepEnv::new(
            RollRoots::new(Some(PathBuf::from("/f")), None, None),
            RollOptions::default(),
        );
        let stage = HotReloadStep::stage(&ConfigDoc::empty(), &env)
            .expect("stage")
            .expect("enabled");
        let lines: Vec<String> = stage.commands.iter().map(CommandSpec::display).collect();
        assert_eq!(
            lines,
            vec![
                "flutter run --release --local-engine=android_release",
                "flutter run --local-engine=android_debug_unopt",
            ]
        );
        assert!(stage
            .commands
            .iter()
            .all(|c| c.cwd.as_deref() == Some(Path::new("/f/examples/flutter_gallery"))));
    }

    #[test]
    fn no_runs_means_no_stage() {
        let doc = ConfigDoc::from_toml_str("<mem>", "[steps.hot_reload]\nruns = []\n").expect("doc");
        let env = StepEnv::new(
            RollRoots::new(Some(PathBuf::from("/f")), None, None),
            RollOptions::default(),
        );
        assert!(HotReloadStep::stage(&doc, &env).expect("ok").is_none());
    }
}
