use std::collections::BTreeMap;

use sdk_roll_macros::Step;
use serde::Deserialize;

use crate::Result;
use crate::executor::CommandSpec;
use crate::steps::StepEnv;

fn default_program() -> String {
    "ninja".into()
}

fn default_configurations() -> Vec<String> {
    [
        "host_debug_unopt",
        "host_release",
        "host_profile",
        "android_debug_unopt",
        "android_debug",
        "android_profile_unopt",
        "android_profile",
        "android_release",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Output root used by the engine's gn wrapper on this platform.
pub fn default_out_dir() -> &'static str {
    if cfg!(target_os = "macos") {
        "xcodebuild"
    } else {
        "out"
    }
}

#[Step(id = "build", default_label = "Build engine", skip_if = "no_build")]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildStep {
    #[serde(default = "crate::steps::default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    #[serde(default = "default_program")]
    pub program: String,
    /// Parallel jobs; defaults to the number of CPUs.
    pub jobs: Option<usize>,
    pub out_dir: Option<String>,
    #[serde(default = "default_configurations")]
    pub configurations: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for BuildStep {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            program: default_program(),
            jobs: None,
            out_dir: None,
            configurations: default_configurations(),
            env: BTreeMap::new(),
        }
    }
}

impl BuildStep {
    pub fn jobs(cfg: &Self) -> usize {
        cfg.jobs.filter(|j| *j > 0).unwrap_or_else(num_cpus::get)
    }

    pub fn commands(cfg: &Self, env: &StepEnv) -> Result<Vec<CommandSpec>> {
        let engine = env.roots.engine()?;
        let out_dir: &str = cfg
            .out_dir
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_out_dir());
        let jobs = Self::jobs(cfg);
        cfg.configurations
            .iter()
            .map(|config| {
                let argv = vec![
                    cfg.program.clone(),
                    format!("-j{jobs}"),
                    "-C".to_string(),
                    format!("{out_dir}/{config}"),
                ];
                env.command_in(&argv, engine, &cfg.env)
            })
            .collect()
    }
}
