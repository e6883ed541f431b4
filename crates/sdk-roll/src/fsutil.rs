use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// `mkdir -p`. A directory that already exists (or appears concurrently) is success.
pub fn ensure_dir(p: &Path) -> Result<()> {
    match fs::create_dir_all(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && p.is_dir() => Ok(()),
        Err(e) => Err(Error::msg(format!(
            "failed to create dir {}: {e}",
            p.display()
        ))),
    }
}

/// Writes through a sibling temp file and renames it over `path`.
pub fn atomic_write_text(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::msg(format!(
            "invalid file path for atomic write: {}",
            path.display()
        ))
    })?;
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    fs::write(&tmp, body)
        .map_err(|e| Error::msg(format!("failed to write temp file {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::msg(format!(
            "failed to rename {} -> {}: {e}",
            tmp.display(),
            path.display()
        ))
    })
}

pub fn write_json_pretty<T: Serialize>(path: &Path, v: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(v)
        .map_err(|e| Error::msg(format!("json encode error: {e}")))?;
    atomic_write_text(path, &s)
}

pub fn remove_dir_if_exists(p: &Path) -> Result<()> {
    match fs::remove_dir_all(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::msg(format!(
            "failed to remove dir {}: {e}",
            p.display()
        ))),
    }
}

/// Copies the regular files directly inside `src` into `dst` (no recursion,
/// dot files skipped). Returns the copied destination paths, sorted.
pub fn copy_top_level_files(src: &Path, dst: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(dst)?;
    let mut copied = Vec::new();
    for entry in WalkDir::new(src).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry =
            entry.map_err(|e| Error::msg(format!("failed to list {}: {e}", src.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let target = dst.join(name);
        fs::copy(entry.path(), &target).map_err(|e| {
            Error::msg(format!(
                "failed to copy {} -> {}: {e}",
                entry.path().display(),
                target.display()
            ))
        })?;
        copied.push(target);
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dir_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = tmp.path().join("a/b/c");
        ensure_dir(&p).expect("first");
        ensure_dir(&p).expect("second");
        assert!(p.is_dir());
    }

    #[test]
    fn ensure_dir_fails_when_a_file_is_in_the_way() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = tmp.path().join("taken");
        fs::write(&p, "x").expect("write");
        assert!(ensure_dir(&p).is_err());
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = tmp.path().join("DEPS");
        fs::write(&p, "old\n").expect("seed");
        atomic_write_text(&p, "new\n").expect("write");
        assert_eq!(fs::read_to_string(&p).expect("read"), "new\n");
        let leftovers = fs::read_dir(tmp.path())
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn copies_only_top_level_visible_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("out");
        fs::create_dir_all(src.join("nested")).expect("mkdir");
        fs::write(src.join("licenses_skia"), "skia").expect("write");
        fs::write(src.join("licenses_dart"), "dart").expect("write");
        fs::write(src.join(".hidden"), "x").expect("write");
        fs::write(src.join("nested/deep"), "x").expect("write");

        let dst = tmp.path().join("golden");
        let copied = copy_top_level_files(&src, &dst).expect("copy");
        let names: Vec<String> = copied
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        assert_eq!(names, vec!["licenses_dart", "licenses_skia"]);
        assert_eq!(
            fs::read_to_string(dst.join("licenses_dart")).expect("read"),
            "dart"
        );
    }
}
