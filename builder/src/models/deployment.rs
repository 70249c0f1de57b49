//! Deployment models

use serde::{Deserialize, Serialize};

/// Identifiers of the deployment being built.
///
/// Fixed at process start and attached to every log event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
    pub project_id: String,
    pub deployment_id: String,
}

impl DeploymentContext {
    pub fn new(project_id: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            deployment_id: deployment_id.into(),
        }
    }
}

/// Status attached to a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Started,
    Running,
    Info,
    Success,
    Failed,
    Completed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Started => "started",
            LogStatus::Running => "running",
            LogStatus::Info => "info",
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
            LogStatus::Completed => "completed",
        }
    }

    /// Terminal statuses end a deployment from the consumer's point of view
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogStatus::Success | LogStatus::Failed | LogStatus::Completed)
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "started" => Ok(LogStatus::Started),
            "running" => Ok(LogStatus::Running),
            "info" => Ok(LogStatus::Info),
            "success" => Ok(LogStatus::Success),
            "failed" => Ok(LogStatus::Failed),
            "completed" => Ok(LogStatus::Completed),
            _ => Err(format!("Invalid log status: {}", s)),
        }
    }
}

/// Log event as it goes out on the bus.
///
/// The field names are the wire contract consumed by the API server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "PROJECT_ID")]
    pub project_id: String,

    #[serde(rename = "DEPLOYMENT_ID")]
    pub deployment_id: String,

    pub log: String,

    pub status: LogStatus,
}

impl LogEvent {
    pub fn new(context: &DeploymentContext, message: impl Into<String>, status: LogStatus) -> Self {
        Self {
            project_id: context.project_id.clone(),
            deployment_id: context.deployment_id.clone(),
            log: message.into(),
            status,
        }
    }
}
