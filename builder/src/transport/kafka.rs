//! Kafka transport implementation
//!
//! Log events go out as keyed records through librdkafka. The producer itself
//! is only compiled with the `kafka` feature; the client properties are plain
//! data so they can be checked without a broker.

use std::time::Duration;

use secrecy::ExposeSecret;

use crate::errors::PipelineError;
use crate::transport::Credentials;

/// Kafka transport options
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Bootstrap brokers as `host:port`
    pub brokers: Vec<String>,
    pub client_id: String,
    pub use_tls: bool,

    /// PEM-encoded CA certificate used to verify the brokers
    pub ca_cert_path: Option<String>,

    /// Presented with SASL PLAIN
    pub credentials: Option<Credentials>,

    /// How long the single connection attempt may take
    pub connect_timeout: Duration,

    /// How long a record may wait in the producer before it is failed
    pub message_timeout: Duration,

    /// How long to wait for in-flight records on disconnect
    pub disconnect_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            client_id: "build-server".to_string(),
            use_tls: true,
            ca_cert_path: None,
            credentials: None,
            connect_timeout: Duration::from_secs(15),
            message_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaConfig {
    /// Split a comma separated broker list
    pub fn parse_brokers(brokers: &str) -> Result<Vec<String>, PipelineError> {
        let brokers: Vec<String> = brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();

        if brokers.is_empty() {
            return Err(PipelineError::ConfigError("Broker address is empty".to_string()));
        }
        if let Some(bad) = brokers.iter().find(|b| !valid_broker(b)) {
            return Err(PipelineError::ConfigError(format!("Invalid broker address {bad}")));
        }
        Ok(brokers)
    }

    /// `security.protocol` matching the TLS and SASL settings
    pub fn security_protocol(&self) -> &'static str {
        match (self.use_tls, self.credentials.is_some()) {
            (true, true) => "SASL_SSL",
            (true, false) => "SSL",
            (false, true) => "SASL_PLAINTEXT",
            (false, false) => "PLAINTEXT",
        }
    }

    /// librdkafka client properties. The SASL password is exposed here, so the
    /// result must never be logged.
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        let mut properties = vec![
            ("bootstrap.servers", self.brokers.join(",")),
            ("client.id", self.client_id.clone()),
            ("security.protocol", self.security_protocol().to_string()),
            ("message.timeout.ms", self.message_timeout.as_millis().to_string()),
            ("socket.connection.setup.timeout.ms", self.connect_timeout.as_millis().to_string()),
        ];

        if let Some(credentials) = &self.credentials {
            properties.push(("sasl.mechanisms", "PLAIN".to_string()));
            properties.push(("sasl.username", credentials.username.clone()));
            properties.push(("sasl.password", credentials.password.expose_secret().to_string()));
        }
        if self.use_tls {
            if let Some(path) = &self.ca_cert_path {
                properties.push(("ssl.ca.location", path.clone()));
            }
        }

        properties
    }
}

fn valid_broker(broker: &str) -> bool {
    match broker.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(feature = "kafka")]
pub use producer::KafkaTransport;

#[cfg(feature = "kafka")]
mod producer {
    use async_trait::async_trait;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    use super::KafkaConfig;
    use crate::errors::PipelineError;
    use crate::transport::{BusMessage, LogTransport};

    /// Message bus producer over Kafka
    pub struct KafkaTransport {
        config: KafkaConfig,
        producer: Mutex<Option<FutureProducer>>,
    }

    impl KafkaTransport {
        pub fn new(config: KafkaConfig) -> Self {
            Self {
                config,
                producer: Mutex::new(None),
            }
        }

        fn client_config(&self) -> ClientConfig {
            let mut client_config = ClientConfig::new();
            for (key, value) in self.config.properties() {
                client_config.set(key, value);
            }
            client_config
        }
    }

    pub(super) fn record(message: &BusMessage) -> FutureRecord<'_, str, [u8]> {
        let record = FutureRecord::<str, [u8]>::to(&message.topic).payload(message.payload.as_slice());
        match &message.key {
            Some(key) => record.key(key.as_str()),
            None => record,
        }
    }

    #[async_trait]
    impl LogTransport for KafkaTransport {
        async fn connect(&self) -> Result<(), PipelineError> {
            let mut producer = self.producer.lock().await;
            if producer.is_some() {
                return Ok(());
            }

            info!(
                "Connecting to brokers {} as {}",
                self.config.brokers.join(","),
                self.config.client_id
            );
            let created: FutureProducer = self
                .client_config()
                .create()
                .map_err(|e| PipelineError::ConnectFailure(e.to_string()))?;

            // Producers connect lazily; a metadata round trip is the connection attempt
            let timeout = self.config.connect_timeout;
            let client = created.clone();
            tokio::task::spawn_blocking(move || client.client().fetch_metadata(None, timeout))
                .await
                .map_err(|e| PipelineError::ConnectFailure(e.to_string()))?
                .map_err(|e| PipelineError::ConnectFailure(e.to_string()))?;

            info!("Kafka connected");
            *producer = Some(created);
            Ok(())
        }

        async fn send(&self, message: BusMessage) -> Result<(), PipelineError> {
            let producer = match self.producer.lock().await.as_ref() {
                Some(producer) => producer.clone(),
                None => {
                    return Err(PipelineError::Transport(
                        "Kafka producer is not connected".to_string(),
                    ))
                }
            };

            producer
                .send(record(&message), self.config.message_timeout)
                .await
                .map(|_| ())
                .map_err(|(e, _)| PipelineError::Transport(e.to_string()))?;

            debug!("Published message to: {}", message.topic);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), PipelineError> {
            let Some(producer) = self.producer.lock().await.take() else {
                debug!("Kafka disconnect requested without a connection");
                return Ok(());
            };

            let timeout = self.config.disconnect_timeout;
            let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
                .await
                .map_err(|e| PipelineError::Transport(e.to_string()))?;
            if let Err(e) = &flushed {
                warn!("Kafka producer not flushed within {:?}: {}", timeout, e);
            }

            info!("Kafka disconnected");
            flushed.map_err(|e| PipelineError::Transport(e.to_string()))
        }
    }
}
