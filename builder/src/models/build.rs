//! Build result models

use std::path::PathBuf;

/// Result of running the build command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Exit code of the build process, `None` if it was killed by a signal
    pub exit_code: Option<i32>,

    pub succeeded: bool,
}

impl BuildOutcome {
    pub fn from_exit_code(exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            succeeded: exit_code == Some(0),
        }
    }
}

/// A file from the dist folder that is about to be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Path relative to the dist folder, always `/`-separated
    pub relative_path: String,

    pub absolute_path: PathBuf,

    pub content_type: Option<String>,
}
