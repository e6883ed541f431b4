//! Fingerprint stamps that let expensive work be skipped when its inputs have
//! not changed.
//!
//! A stamp file holds one line: the fingerprint of the inputs the guarded work
//! last completed for. A missing or unreadable stamp is always a miss. The
//! stamp is only written after the work succeeded, so an interrupted fetch is
//! never mistaken for a complete one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampState {
    Hit,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampCache {
    stamp_path: PathBuf,
    artifact_dir: Option<PathBuf>,
}

impl StampCache {
    pub fn new(stamp_path: impl Into<PathBuf>) -> Self {
        Self {
            stamp_path: stamp_path.into(),
            artifact_dir: None,
        }
    }

    /// Directory holding the cached artifact; it is deleted before a refetch.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn stamp_path(&self) -> &Path {
        &self.stamp_path
    }

    pub fn artifact_dir(&self) -> Option<&Path> {
        self.artifact_dir.as_deref()
    }

    pub fn read(&self) -> Option<String> {
        let raw = fs::read_to_string(&self.stamp_path).ok()?;
        let line = raw.lines().next()?.trim();
        (!line.is_empty()).then(|| line.to_string())
    }

    pub fn check(&self, fingerprint: &str) -> StampState {
        match self.read() {
            Some(stored) if stored == fingerprint.trim() => StampState::Hit,
            _ => StampState::Miss,
        }
    }

    pub fn record(&self, fingerprint: &str) -> Result<()> {
        let fingerprint = fingerprint.trim();
        if fingerprint.is_empty() || fingerprint.contains('\n') {
            return Err(Error::msg("stamp fingerprint must be a single non-empty line"));
        }
        fsutil::atomic_write_text(&self.stamp_path, &format!("{fingerprint}\n"))
    }

    /// Removes the stamp and the cached artifact.
    pub fn invalidate(&self) -> Result<()> {
        match fs::remove_file(&self.stamp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::msg(format!(
                    "failed to remove stamp {}: {e}",
                    self.stamp_path.display()
                )));
            }
        }
        if let Some(dir) = &self.artifact_dir {
            fsutil::remove_dir_if_exists(dir)?;
        }
        Ok(())
    }

    /// Runs `fetch` unless the stamp already matches `fingerprint`.
    ///
    /// On a miss the old artifact is removed first and the stamp is written
    /// only once `fetch` returned `Ok`.
    pub fn ensure<F>(&self, fingerprint: &str, fetch: F) -> Result<StampState>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.check(fingerprint) == StampState::Hit {
            return Ok(StampState::Hit);
        }
        self.invalidate()?;
        fetch()?;
        self.record(fingerprint)?;
        Ok(StampState::Miss)
    }
}

/// A stamp bound to the fingerprint a pipeline stage is expected to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampGuard {
    pub cache: StampCache,
    pub fingerprint: String,
}

impl StampGuard {
    pub fn new(cache: StampCache, fingerprint: impl Into<String>) -> Self {
        Self {
            cache,
            fingerprint: fingerprint.into(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.cache.check(&self.fingerprint) == StampState::Hit
    }

    pub fn record(&self) -> Result<()> {
        self.cache.record(&self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn absent_stamp_is_a_miss() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = StampCache::new(tmp.path().join("sdk.stamp"));
        assert_eq!(cache.check("https://example.invalid/sdk.zip"), StampState::Miss);
        assert!(cache.read().is_none());
    }

    #[test]
    fn ensure_fetches_once_per_fingerprint() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let artifact = tmp.path().join("dart-sdk");
        let cache = StampCache::new(tmp.path().join("dart-sdk.stamp")).with_artifact_dir(&artifact);
        let fetches = Cell::new(0);
        let fetch = || -> Result<()> {
            fetches.set(fetches.get() + 1);
            fs::create_dir_all(&artifact)?;
            fs::write(artifact.join("version"), "1")?;
            Ok(())
        };

        assert_eq!(cache.ensure("url-a", fetch).expect("first"), StampState::Miss);
        assert_eq!(cache.ensure("url-a", fetch).expect("second"), StampState::Hit);
        assert_eq!(fetches.get(), 1);
        assert_eq!(cache.read().as_deref(), Some("url-a"));

        fs::write(artifact.join("stale"), "x").expect("write");
        assert_eq!(cache.ensure("url-b", fetch).expect("third"), StampState::Miss);
        assert_eq!(fetches.get(), 2);
        assert!(!artifact.join("stale").exists());
    }

    #[test]
    fn failed_fetch_leaves_no_stamp() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = StampCache::new(tmp.path().join("s.stamp"));
        cache.record("old").expect("seed");

        let err = cache
            .ensure("new", || Err(Error::msg("download interrupted")))
            .unwrap_err();
        assert_eq!(err.to_string(), "download interrupted");
        assert!(cache.read().is_none());
        assert_eq!(cache.check("old"), StampState::Miss);
    }

    #[test]
    fn guard_tracks_fingerprint() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let guard = StampGuard::new(StampCache::new(tmp.path().join("sync.stamp")), "abc");
        assert!(!guard.is_fresh());
        guard.record().expect("record");
        assert!(guard.is_fresh());
        let other = StampGuard::new(guard.cache.clone(), "def");
        assert!(!other.is_fresh());
    }
}
