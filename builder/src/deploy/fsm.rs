//! Finite State Machine for a build-and-deploy run

use serde::{Deserialize, Serialize};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing has happened yet
    Init,

    /// Connecting to the message bus
    Connecting,

    /// Build command running
    Building,

    /// Build failed, nothing uploaded
    BuildFailed,

    /// Uploading artifacts
    Uploading,

    /// Upload failed, possibly after a partial upload
    UploadFailed,

    /// Build and upload succeeded
    Completed,

    /// Bus connection released, run over
    Disconnected,
}

impl PipelineState {
    /// States from which the run can only disconnect
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::BuildFailed | PipelineState::UploadFailed | PipelineState::Completed
        )
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Start connecting to the bus
    Connect,

    /// Bus connection established
    Connected,

    /// Build exited with code 0
    BuildSucceeded,

    /// Build failed to start, exited non-zero, or was stopped
    BuildFailed(String),

    /// Every artifact uploaded
    UploadSucceeded,

    /// Dist folder missing or an upload failed
    UploadFailed(String),

    /// Release the bus connection
    Disconnect,
}

/// Pipeline FSM
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    state: PipelineState,
    error: Option<String>,
    history: Vec<PipelineState>,
}

impl PipelineFsm {
    /// Create a new FSM in init state
    pub fn new() -> Self {
        Self {
            state: PipelineState::Init,
            error: None,
            history: vec![PipelineState::Init],
        }
    }

    /// Get current state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// The last state before disconnecting
    pub fn outcome(&self) -> PipelineState {
        self.history
            .iter()
            .rev()
            .find(|s| **s != PipelineState::Disconnected)
            .copied()
            .unwrap_or(PipelineState::Init)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PipelineEvent) -> Result<PipelineState, String> {
        let new_state = match (&self.state, &event) {
            (PipelineState::Init, PipelineEvent::Connect) => PipelineState::Connecting,

            (PipelineState::Connecting, PipelineEvent::Connected) => PipelineState::Building,

            (PipelineState::Building, PipelineEvent::BuildSucceeded) => PipelineState::Uploading,
            (PipelineState::Building, PipelineEvent::BuildFailed(err)) => {
                self.error = Some(err.clone());
                PipelineState::BuildFailed
            }

            (PipelineState::Uploading, PipelineEvent::UploadSucceeded) => PipelineState::Completed,
            (PipelineState::Uploading, PipelineEvent::UploadFailed(err)) => {
                self.error = Some(err.clone());
                PipelineState::UploadFailed
            }

            // A failed connection skips straight to the release
            (PipelineState::Connecting, PipelineEvent::Disconnect) => PipelineState::Disconnected,
            (state, PipelineEvent::Disconnect) if state.is_terminal() => {
                PipelineState::Disconnected
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}
