use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};

pub const FLUTTER_HOME_ENV: &str = "FLUTTER_HOME";
pub const ENGINE_HOME_ENV: &str = "ENGINE_HOME";
pub const DART_SDK_HOME_ENV: &str = "DART_SDK_HOME";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RootsConfig {
    pub flutter_home: Option<String>,
    pub engine_home: Option<String>,
    pub dart_sdk_home: Option<String>,
}

/// Roots passed on the command line; they win over config and environment.
#[derive(Debug, Clone, Default)]
pub struct RootOverrides {
    pub flutter_home: Option<PathBuf>,
    pub engine_home: Option<PathBuf>,
    pub dart_sdk_home: Option<PathBuf>,
}

/// The three checkouts a roll touches. Each one is only required by the
/// steps that use it, so lookups fail lazily.
#[derive(Debug, Clone, Default)]
pub struct RollRoots {
    flutter_home: Option<PathBuf>,
    engine_home: Option<PathBuf>,
    dart_sdk_home: Option<PathBuf>,
}

impl RollRoots {
    pub fn new(
        flutter_home: Option<PathBuf>,
        engine_home: Option<PathBuf>,
        dart_sdk_home: Option<PathBuf>,
    ) -> Self {
        Self {
            flutter_home,
            engine_home,
            dart_sdk_home,
        }
    }

    pub fn resolve(doc: &ConfigDoc, overrides: &RootOverrides) -> Result<Self> {
        Self::resolve_with_env(doc, overrides, |k| std::env::var(k).ok())
    }

    pub fn resolve_with_env<F>(doc: &ConfigDoc, overrides: &RootOverrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cfg: RootsConfig = doc.deserialize_path("roots")?.unwrap_or_default();
        let base = config_base_dir(doc);
        let pick = |cli: &Option<PathBuf>, configured: &Option<String>, key: &str| {
            cli.clone()
                .or_else(|| non_empty(configured.as_deref()).map(|p| rooted(&base, p)))
                .or_else(|| non_empty(env(key).as_deref()).map(PathBuf::from))
        };
        Ok(Self {
            flutter_home: pick(&overrides.flutter_home, &cfg.flutter_home, FLUTTER_HOME_ENV),
            engine_home: pick(&overrides.engine_home, &cfg.engine_home, ENGINE_HOME_ENV),
            dart_sdk_home: pick(&overrides.dart_sdk_home, &cfg.dart_sdk_home, DART_SDK_HOME_ENV),
        })
    }

    pub fn flutter(&self) -> Result<&Path> {
        require(&self.flutter_home, "flutter_home", FLUTTER_HOME_ENV)
    }

    pub fn engine(&self) -> Result<&Path> {
        require(&self.engine_home, "engine_home", ENGINE_HOME_ENV)
    }

    pub fn dart_sdk(&self) -> Result<&Path> {
        require(&self.dart_sdk_home, "dart_sdk_home", DART_SDK_HOME_ENV)
    }

    // <engine>/flutter holds the manifest, the license tooling and the commit.
    pub fn engine_flutter(&self) -> Result<PathBuf> {
        Ok(self.engine()?.join("flutter"))
    }

    // Stage stamps live next to the build output so a clean checkout forgets them.
    pub fn stamp_dir(&self) -> Result<PathBuf> {
        Ok(self.engine()?.join("out").join("roll_stamps"))
    }

    // Relative paths are rooted at the engine checkout.
    pub fn under_engine(&self, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::msg("empty path"));
        }
        let p = PathBuf::from(raw);
        Ok(if p.is_absolute() {
            p
        } else {
            self.engine()?.join(p)
        })
    }
}

fn require<'a>(slot: &'a Option<PathBuf>, name: &str, env: &str) -> Result<&'a Path> {
    slot.as_deref().ok_or_else(|| Error::MissingRoot {
        name: name.to_string(),
        flag: name.replace('_', "-"),
        env: env.to_string(),
    })
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn rooted(base: &Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    if p.is_absolute() { p } else { base.join(p) }
}

fn config_base_dir(doc: &ConfigDoc) -> PathBuf {
    doc.path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
