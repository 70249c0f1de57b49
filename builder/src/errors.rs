//! Error types for the build runner

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the build pipeline.
///
/// Every variant except [`PipelineError::Transport`] is fatal: it ends the run
/// and turns into a non-zero process exit code. Transport errors come from log
/// publishing and are swallowed by the publisher.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Object store error: {0}")]
    StoreError(#[from] object_store::Error),

    #[error("Unable to connect to the message bus: {0}")]
    ConnectFailure(String),

    #[error("Build process exited with code {}", fmt_exit_code(*.exit_code))]
    BuildFailure { exit_code: Option<i32> },

    #[error("Build timed out after {0:?}")]
    BuildTimeout(std::time::Duration),

    #[error("Unable to start build process: {0}")]
    Spawn(std::io::Error),

    #[error("Dist folder not found after build: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Upload of {key} failed: {reason}")]
    UploadFailure { key: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline state error: {0}")]
    StateError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_exit_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

impl PipelineError {
    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}
