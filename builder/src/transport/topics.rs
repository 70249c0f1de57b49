//! Bus topic definitions

/// Topic and naming conventions shared with the log consumer
pub struct Topics;

impl Topics {
    /// Topic every deployment log event is published to
    pub const CONTAINER_LOGS: &'static str = "container-logs";

    /// Message key attached to log events
    pub const LOG_KEY: &'static str = "log";

    /// Producer identity for a deployment
    pub fn client_id(deployment_id: &str) -> String {
        format!("build-server-{}", deployment_id)
    }
}
