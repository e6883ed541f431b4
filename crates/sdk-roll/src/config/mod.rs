use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "roll.toml";

/// A resolved roll definition (after `extends` and `imports` are inlined).
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    /// An empty definition: every section falls back to its defaults.
    pub fn empty() -> Self {
        Self {
            path: PathBuf::from("<defaults>"),
            value: Value::Table(Default::default()),
        }
    }

    pub fn from_toml_str(path: impl Into<PathBuf>, raw: &str) -> Result<Self> {
        let path = path.into();
        let value: Value = toml::from_str(raw)
            .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;
        Ok(Self { path, value })
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn table_path(&self, path: &str) -> Option<&toml::value::Table> {
        self.value_path(path)?.as_table()
    }

    pub fn has_table_path(&self, path: &str) -> bool {
        self.table_path(path).is_some()
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::msg(format!("failed to deserialize config at '{path}': {e}")))?;
        Ok(Some(parsed))
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(overlay_tbl)) => {
            for (k, v) in overlay_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn take_imports(path: &Path, table: &mut toml::value::Table) -> Result<Vec<String>> {
    let Some(raw) = table.remove("imports") else {
        return Ok(Vec::new());
    };
    let Some(arr) = raw.as_array() else {
        return Err(Error::msg(format!(
            "invalid imports in {} (expected array of strings)",
            path.display()
        )));
    };
    let mut out = Vec::new();
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(Error::msg(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

// Imports at any table level are merged first; the importing table wins on conflicts.
fn inline_imports(file_path: &Path, value: &mut Value, stack: &mut HashSet<PathBuf>) -> Result<()> {
    let Value::Table(tbl) = value else {
        return Ok(());
    };

    let imports = take_imports(file_path, tbl)?;
    if !imports.is_empty() {
        let mut acc = Value::Table(Default::default());
        for imp in imports {
            let loaded = load_value(&resolve_ref_path(file_path, &imp), stack)?;
            merge(&mut acc, loaded);
        }
        merge(&mut acc, Value::Table(std::mem::take(tbl)));
        if let Value::Table(merged) = acc {
            *tbl = merged;
        }
    }

    for (_, v) in tbl.iter_mut() {
        inline_imports(file_path, v, stack)?;
    }
    Ok(())
}

fn load_value(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::msg(format!(
            "config import cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    let parent = value
        .as_table_mut()
        .and_then(|t| t.remove("extends"))
        .and_then(|v| v.as_str().map(str::to_string));
    if let Some(ext) = parent {
        out = load_value(&resolve_ref_path(path, &ext), stack)?;
    }

    inline_imports(path, &mut value, stack)?;
    merge(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Loads an explicit definition, or `roll.toml` from the working directory when
/// present, or falls back to an empty definition.
pub fn load_or_default(explicit: Option<&Path>) -> Result<ConfigDoc> {
    if let Some(p) = explicit {
        return load(p);
    }
    let implicit = Path::new(DEFAULT_CONFIG_FILE);
    if implicit.is_file() {
        return load(implicit);
    }
    Ok(ConfigDoc::empty())
}
