//! Revision bookkeeping for the roll commit.

use std::path::PathBuf;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::executor::{self, CommandSpec};

const REVISION_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._/-]*$";

/// Rejects revisions that could not be written into a quoted manifest value
/// or passed safely as a range endpoint.
pub fn validate_revision(rev: &str) -> Result<()> {
    let re = Regex::new(REVISION_PATTERN)
        .map_err(|e| Error::msg(format!("invalid revision pattern: {e}")))?;
    if re.is_match(rev) {
        Ok(())
    } else {
        Err(Error::InvalidRevision(rev.to_string()))
    }
}

/// The pinned revision before and after the patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionPair {
    pub original: String,
    pub updated: String,
}

impl RevisionPair {
    pub fn new(original: impl Into<String>, updated: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            updated: updated.into(),
        }
    }

    pub fn range(&self) -> String {
        format!("{}...{}", self.original, self.updated)
    }

    pub fn is_complete(&self) -> bool {
        !self.original.trim().is_empty() && !self.updated.trim().is_empty()
    }
}

/// `<vcs> log <args..> <original>...<updated>`, run inside `repo`.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub vcs: String,
    pub repo: PathBuf,
    pub args: Vec<String>,
}

impl LogQuery {
    pub fn new(vcs: impl Into<String>, repo: impl Into<PathBuf>) -> Self {
        Self {
            vcs: vcs.into(),
            repo: repo.into(),
            args: vec!["--oneline".into()],
        }
    }

    pub fn command(&self, pair: &RevisionPair) -> CommandSpec {
        let mut argv = vec![self.vcs.clone(), "log".to_string()];
        argv.extend(self.args.iter().cloned());
        argv.push(pair.range());
        CommandSpec::new(argv).cwd(&self.repo)
    }

    /// Returns the raw log text for the pair's range.
    pub fn run(&self, pair: &RevisionPair) -> Result<String> {
        let range = pair.range();
        let failed = |reason: String| Error::LogQueryFailed {
            range: range.clone(),
            reason,
        };
        if pair.original.trim().is_empty() {
            return Err(failed("original revision is empty".into()));
        }
        if pair.updated.trim().is_empty() {
            return Err(failed("updated revision is empty".into()));
        }

        let spec = self.command(pair);
        let out = executor::capture(&spec, None).map_err(|e| failed(e.to_string()))?;
        if !out.success(&spec) {
            let status = out
                .exit_code
                .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
            let detail = out.stderr_lines().join("; ");
            let reason = if detail.is_empty() {
                format!("`{}` failed with {status}", spec.display())
            } else {
                format!("`{}` failed with {status}: {detail}", spec.display())
            };
            return Err(failed(reason));
        }
        Ok(out.stdout)
    }
}

/// `"<subject> for <YYYY-MM-DD>\n\n<log>"`.
pub fn commit_message(subject: &str, date: NaiveDate, log: &str) -> String {
    format!("{subject} for {date}\n\n{log}")
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
