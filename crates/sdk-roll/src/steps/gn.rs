use std::collections::BTreeMap;

use sdk_roll_macros::Step;
use serde::Deserialize;

use crate::Result;
use crate::executor::CommandSpec;
use crate::steps::StepEnv;

fn default_program() -> String {
    "flutter/tools/gn".into()
}

fn default_common_args() -> Vec<String> {
    vec!["--goma".into()]
}

fn default_runtime_modes() -> Vec<String> {
    vec!["debug".into(), "profile".into(), "release".into()]
}

/// Regenerates build files for every host/android runtime mode. The
/// invocations write disjoint output directories and run concurrently.
#[Step(
    id = "gn",
    default_label = "Generate build files",
    concurrent = true,
    skip_if = "no_build"
)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GnStep {
    #[serde(default = "crate::steps::default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_common_args")]
    pub common_args: Vec<String>,
    #[serde(default = "default_runtime_modes")]
    pub runtime_modes: Vec<String>,
    #[serde(default = "crate::steps::default_true")]
    pub host: bool,
    #[serde(default = "crate::steps::default_true")]
    pub android: bool,
    pub env: BTreeMap<String, String>,
}

impl Default for GnStep {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            program: default_program(),
            common_args: default_common_args(),
            runtime_modes: default_runtime_modes(),
            host: true,
            android: true,
            env: BTreeMap::new(),
        }
    }
}

impl GnStep {
    /// Argument lists (without the program) for every configuration.
    ///
    /// Android gets an extra unoptimized build for every non-release mode;
    /// the host build is unoptimized in debug only.
    pub fn matrix(cfg: &Self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        for mode in &cfg.runtime_modes {
            let mode_arg = format!("--runtime-mode={mode}");
            let release = mode == "release";
            let with = |extra: &[&str]| {
                let mut args = cfg.common_args.clone();
                args.extend(extra.iter().map(|s| s.to_string()));
                args.push(mode_arg.clone());
                args
            };
            if cfg.android {
                if !release {
                    out.push(with(&["--android", "--unoptimized"]));
                }
                out.push(with(&["--android"]));
            }
            if cfg.host {
                if mode == "debug" {
                    out.push(with(&["--unoptimized"]));
                } else {
                    out.push(with(&[]));
                }
            }
        }
        out
    }

    pub fn commands(cfg: &Self, env: &StepEnv) -> Result<Vec<CommandSpec>> {
        let engine = env.roots.engine()?;
        Self::matrix(cfg)
            .into_iter()
            .map(|args| {
                let argv: Vec<String> = std::iter::once(cfg.program.clone()).chain(args).collect();
                env.command_in(&argv, engine, &cfg.env)
            })
            .collect()
    }
}
