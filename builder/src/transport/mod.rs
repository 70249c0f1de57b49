//! Message bus transport

pub mod kafka;
pub mod mqtt;
pub mod topics;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::PipelineError;

/// Which bus implementation carries the logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Mqtt,
    Kafka,
}

impl std::str::FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mqtt" => Ok(BusKind::Mqtt),
            "kafka" => Ok(BusKind::Kafka),
            _ => Err(format!("Invalid bus kind: {}", s)),
        }
    }
}

/// Username/password pair presented to the broker
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// A message ready to be handed to the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Producer side of the message bus.
///
/// `connect` is called once before any `send`, `disconnect` once after the
/// last `send` has been issued. `disconnect` must be safe to call when
/// `connect` failed or was never called.
#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn connect(&self) -> Result<(), PipelineError>;

    async fn send(&self, message: BusMessage) -> Result<(), PipelineError>;

    async fn disconnect(&self) -> Result<(), PipelineError>;
}
