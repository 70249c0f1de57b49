//! Test doubles shared by unit tests

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::PipelineError;
use crate::models::deployment::{DeploymentContext, LogEvent, LogStatus};
use crate::transport::{BusMessage, LogTransport};
use crate::workers::publisher::{self, LogPublisher, PublisherWorker};

/// Transport that records every event it is sent
#[derive(Default)]
pub struct RecordingTransport {
    pub events: Mutex<Vec<LogEvent>>,
}

impl RecordingTransport {
    pub async fn logs_with_status(&self, status: LogStatus) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.log.clone())
            .collect()
    }
}

#[async_trait]
impl LogTransport for RecordingTransport {
    async fn connect(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn send(&self, message: BusMessage) -> Result<(), PipelineError> {
        let event: LogEvent = serde_json::from_slice(&message.payload)?;
        self.events.lock().await.push(event);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Publisher wired to a recording transport
pub fn recording_publisher() -> (LogPublisher, PublisherWorker, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let (publisher, worker) = LogPublisher::spawn(
        transport.clone(),
        DeploymentContext::new("proj-1", "dep-1"),
        &publisher::Options::default(),
    );
    (publisher, worker, transport)
}
