use std::path::{Path, PathBuf};

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_SYNC_FAILED: i32 = 1;
pub const EXIT_BUILD_FAILED: i32 = 2;
pub const EXIT_TEST_FAILED: i32 = 3;
pub const EXIT_HOT_RELOAD_FAILED: i32 = 4;
pub const EXIT_MISSING_ROOTS: i32 = 5;
pub const EXIT_LICENSES_FAILED: i32 = 6;
pub const EXIT_MANIFEST_INVALID: i32 = 7;
pub const EXIT_LOG_QUERY_FAILED: i32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Msg(String),

    #[error("field '{field}' not found in {origin}")]
    FieldNotFound { field: String, origin: String },

    #[error("field '{field}' at {origin}:{line} does not hold exactly one quoted value")]
    MalformedField {
        field: String,
        origin: String,
        line: usize,
    },

    #[error(
        "dependency block after '{field}' in {origin} runs to end of input (skipping started at line {line})"
    )]
    UnterminatedBlock {
        field: String,
        origin: String,
        line: usize,
    },

    #[error("{}", stage_failure_text(.stage, .command, .cwd, .exit_code, .output, .hint))]
    StageCommandFailed {
        stage: String,
        command: String,
        cwd: PathBuf,
        exit_code: Option<i32>,
        output: Vec<String>,
        hint: Option<String>,
    },

    #[error("log query for '{range}' failed: {reason}")]
    LogQueryFailed { range: String, reason: String },

    #[error("{name} is not set (pass --{flag}, set [roots].{name} or export {env})")]
    MissingRoot {
        name: String,
        flag: String,
        env: String,
    },

    #[error("invalid revision '{0}'")]
    InvalidRevision(String),

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Msg(msg.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::FieldNotFound { .. }
            | Error::MalformedField { .. }
            | Error::UnterminatedBlock { .. }
            | Error::InvalidRevision(_) => EXIT_MANIFEST_INVALID,
            Error::StageCommandFailed { stage, .. } => match stage.as_str() {
                "sync" => EXIT_SYNC_FAILED,
                "gn" | "build" => EXIT_BUILD_FAILED,
                "test" => EXIT_TEST_FAILED,
                "hot_reload" => EXIT_HOT_RELOAD_FAILED,
                "licenses" => EXIT_LICENSES_FAILED,
                _ => EXIT_FAILURE,
            },
            Error::LogQueryFailed { .. } => EXIT_LOG_QUERY_FAILED,
            Error::MissingRoot { .. } => EXIT_MISSING_ROOTS,
            Error::Msg(_) | Error::Cancelled => EXIT_FAILURE,
        }
    }
}

fn stage_failure_text(
    stage: &str,
    command: &str,
    cwd: &Path,
    exit_code: &Option<i32>,
    output: &[String],
    hint: &Option<String>,
) -> String {
    let status = match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    };
    let mut out = format!(
        "stage '{stage}' failed: `{command}` in {} ({status})",
        cwd.display()
    );
    if let Some(h) = hint {
        out.push_str(&format!("\n  hint: {h}"));
    }
    if !output.is_empty() {
        out.push_str("\n  output:");
        for line in output {
            out.push_str("\n    ");
            out.push_str(line);
        }
    }
    out
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failure_maps_to_stage_exit_code() {
        let err = Error::StageCommandFailed {
            stage: "build".into(),
            command: "ninja -C out/host_debug_unopt".into(),
            cwd: PathBuf::from("/engine/src"),
            exit_code: Some(1),
            output: vec!["ninja: error: loading 'build.ninja'".into()],
            hint: None,
        };
        assert_eq!(err.exit_code(), EXIT_BUILD_FAILED);
        let text = err.to_string();
        assert!(text.contains("exit code 1"), "unexpected: {text}");
        assert!(text.contains("loading 'build.ninja'"), "unexpected: {text}");
    }

    #[test]
    fn manifest_errors_share_exit_code() {
        let err = Error::FieldNotFound {
            field: "dart_revision".into(),
            origin: "DEPS".into(),
        };
        assert_eq!(err.exit_code(), EXIT_MANIFEST_INVALID);
        assert_eq!(err.to_string(), "field 'dart_revision' not found in DEPS");
    }
}
