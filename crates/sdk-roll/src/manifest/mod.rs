//! In-memory dependency manifest and the two edits a roll makes to it.
//!
//! The manifest is kept as a list of lines that still carry their line
//! terminators, so writing it back is byte-exact for every line the roll
//! does not touch. Edits happen in memory; [`Manifest::persist`] is the only
//! place the file is written.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::fsutil;

pub mod patch;
pub mod splice;

pub use patch::FieldPatch;
pub use splice::{GroupClassifier, PrefixGroup};

fn default_manifest_path() -> String {
    "flutter/DEPS".into()
}

fn default_revision_field() -> String {
    "dart_revision".into()
}

fn default_group_prefix() -> String {
    "dart_".into()
}

fn default_generator() -> String {
    "tools/dart/create_updated_flutter_deps.py".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    #[serde(default = "default_manifest_path")]
    pub path: String,
    #[serde(default = "default_revision_field")]
    pub revision_field: String,
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,
    #[serde(default = "default_generator")]
    pub generator: String,
    /// Write and sync the patched manifest before running the generator.
    #[serde(default = "crate::steps::default_true")]
    pub sync_before_generate: bool,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            path: default_manifest_path(),
            revision_field: default_revision_field(),
            group_prefix: default_group_prefix(),
            generator: default_generator(),
            sync_before_generate: true,
        }
    }
}

/// Identifies the pinned revision entry by its key name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMarker {
    name: String,
}

impl FieldMarker {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.contains(['\'', '"', '\n']) {
            return Err(Error::msg(format!("invalid manifest field name '{name}'")));
        }
        Ok(Self {
            name: trimmed.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte range of the quoted key inside `line`, quotes included.
    pub fn locate(&self, line: &str) -> Option<(usize, usize)> {
        ['\'', '"'].iter().find_map(|q| {
            let needle = format!("{q}{}{q}", self.name);
            line.find(&needle).map(|start| (start, start + needle.len()))
        })
    }

    pub fn matches(&self, line: &str) -> bool {
        self.locate(line).is_some()
    }

    pub fn canonical_line(&self, value: &str) -> String {
        format!("  '{}': '{}',\n", self.name, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    origin: PathBuf,
    lines: Vec<String>,
}

impl Manifest {
    pub fn from_text(origin: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            origin: origin.into(),
            lines: split_lines(text),
        }
    }

    pub fn from_lines<I, S>(origin: impl Into<PathBuf>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origin: origin.into(),
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::msg(format!("failed to read manifest {}: {e}", path.display())))?;
        Ok(Self::from_text(path, &text))
    }

    /// One full overwrite of the origin file.
    pub fn persist(&self) -> Result<()> {
        fsutil::atomic_write_text(&self.origin, &self.to_text())
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn origin_name(&self) -> String {
        self.origin.display().to_string()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn to_text(&self) -> String {
        self.lines.concat()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_text(&self.to_text())
    }

    /// Rewrites the first line holding `marker` and returns the value it replaced.
    pub fn patch_field(&mut self, marker: &FieldMarker, value: &str) -> Result<FieldPatch> {
        let origin = self.origin_name();
        patch::patch_field(&mut self.lines, &origin, marker, value)
    }

    /// Replaces the dependency group following `marker` with `block`.
    /// The manifest is left untouched when the splice fails.
    pub fn splice_block(
        &mut self,
        marker: &FieldMarker,
        block: &[String],
        group: &dyn GroupClassifier,
    ) -> Result<()> {
        let spliced = splice::splice_block(&self.lines, &self.origin_name(), marker, block, group)?;
        self.lines = spliced;
        Ok(())
    }
}

/// Splits text into lines that keep their `\n`.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

/// Turns generator output into block lines; every line ends with `\n`.
pub fn block_lines(text: &str) -> Vec<String> {
    split_lines(text)
        .into_iter()
        .map(|mut l| {
            if !l.ends_with('\n') {
                l.push('\n');
            }
            l
        })
        .collect()
}

pub fn fingerprint_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
