//! Error taxonomy for the conversion and analysis pipeline.

use serde::{Deserialize, Serialize};

/// Errors produced anywhere between classification and packaging.
///
/// None of these are retried; the dispatcher surfaces them as-is to the
/// delivery mechanism of the active execution mode.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("engine exited with status {exit_code}")]
    EngineInvocation { exit_code: i32, stderr: String },

    #[error("engine did not finish within {limit_secs}s")]
    EngineTimeout { limit_secs: u64 },

    #[error("failed to launch engine `{program}`: {source}")]
    EngineSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine finished but produced no output files")]
    NoOutput { stdout: String },

    #[error(
        "analysis didn't produce expected output; this could be due to invalid parameters"
    )]
    UnexpectedOutput { stdout: String, stderr: String },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("could not resolve a top module among {} converted file(s)", candidates.len())]
    UnresolvedTopModule {
        top_model_id: Option<String>,
        candidates: Vec<String>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Stable machine-readable kind, used as `ErrorBody::kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::EngineInvocation { .. } => "engine_invocation",
            PipelineError::EngineTimeout { .. } => "engine_timeout",
            PipelineError::EngineSpawn { .. } => "engine_spawn",
            PipelineError::NoOutput { .. } => "no_output",
            PipelineError::UnexpectedOutput { .. } => "unexpected_output",
            PipelineError::Archive(_) => "archive",
            PipelineError::UnresolvedTopModule { .. } => "unresolved_top_module",
            PipelineError::Io(_) => "io",
            PipelineError::Task(_) => "task",
        }
    }

    /// Structured body shared by the sync error response and the `error` callback.
    pub fn to_body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
            exit_code: None,
            stdout: None,
            stderr: None,
            candidates: Vec::new(),
        };

        match self {
            PipelineError::EngineInvocation { exit_code, stderr } => {
                body.exit_code = Some(*exit_code);
                body.stderr = Some(stderr.clone());
            }
            PipelineError::NoOutput { stdout } => body.stdout = Some(stdout.clone()),
            PipelineError::UnexpectedOutput { stdout, stderr } => {
                body.stdout = Some(stdout.clone());
                body.stderr = Some(stderr.clone());
            }
            PipelineError::UnresolvedTopModule { candidates, .. } => {
                body.candidates = candidates.clone();
            }
            _ => {}
        }

        body
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Task(err.to_string())
    }
}

/// Serialisable error payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
