//! MQTT transport implementation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::errors::PipelineError;
use crate::filesys::file::File;
use crate::transport::{BusMessage, Credentials, LogTransport};

/// Broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 8883,
            use_tls: true,
            ca_cert_path: None,
        }
    }
}

impl MqttAddress {
    /// Parse a `host:port` broker string, keeping the default port when none is given
    pub fn parse(broker: &str) -> Result<Self, PipelineError> {
        let broker = broker.trim();
        if broker.is_empty() {
            return Err(PipelineError::ConfigError("Broker address is empty".to_string()));
        }

        let mut address = Self::default();
        match broker.rsplit_once(':') {
            Some((host, port)) => {
                address.host = host.to_string();
                address.port = port.parse().map_err(|_| {
                    PipelineError::ConfigError(format!("Invalid broker port in {broker}"))
                })?;
            }
            None => address.host = broker.to_string(),
        }

        if address.host.is_empty() {
            return Err(PipelineError::ConfigError(format!("Invalid broker address {broker}")));
        }
        Ok(address)
    }
}

/// MQTT transport options
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub address: MqttAddress,
    pub credentials: Option<Credentials>,
    pub client_id: String,
    pub keep_alive: Duration,

    /// How long the single connection attempt may take
    pub connect_timeout: Duration,

    /// How long to wait for the outgoing disconnect to be flushed
    pub disconnect_timeout: Duration,

    /// Capacity of the client's request channel
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            address: MqttAddress::default(),
            credentials: None,
            client_id: "build-server".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
            disconnect_timeout: Duration::from_secs(5),
            request_capacity: 64,
        }
    }
}

struct Connection {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

/// Message bus producer over MQTT
pub struct MqttTransport {
    config: MqttConfig,
    connection: Mutex<Option<Connection>>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    async fn options(&self) -> Result<MqttOptions, PipelineError> {
        let address = &self.config.address;
        if address.host.is_empty() {
            return Err(PipelineError::ConnectFailure("MQTT host is not configured".to_string()));
        }

        let mut options = MqttOptions::new(&self.config.client_id, &address.host, address.port);
        options.set_keep_alive(self.config.keep_alive);
        if let Some(credentials) = &self.config.credentials {
            options.set_credentials(
                credentials.username.clone(),
                credentials.password.expose_secret().to_string(),
            );
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = File::new(ca_path).read_bytes().await.map_err(|e| {
                    PipelineError::ConnectFailure(format!("Failed to read CA cert {ca_path}: {e}"))
                })?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
                if root_cert_store.is_empty() {
                    return Err(PipelineError::ConnectFailure(format!(
                        "No certificates found in {ca_path}"
                    )));
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        Ok(options)
    }
}

#[async_trait]
impl LogTransport for MqttTransport {
    async fn connect(&self) -> Result<(), PipelineError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Ok(());
        }

        let options = self.options().await?;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.request_capacity);

        info!(
            "Connecting to broker {}:{} as {}",
            self.config.address.host, self.config.address.port, self.config.client_id
        );
        match tokio::time::timeout(self.config.connect_timeout, await_connack(&mut eventloop)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(PipelineError::ConnectFailure(format!(
                    "No acknowledgement from broker within {:?}",
                    self.config.connect_timeout
                )))
            }
        }

        info!("MQTT connected");
        let poller = tokio::spawn(drive(eventloop));
        *connection = Some(Connection { client, poller });
        Ok(())
    }

    async fn send(&self, message: BusMessage) -> Result<(), PipelineError> {
        let client = match self.connection.lock().await.as_ref() {
            Some(connection) => connection.client.clone(),
            None => return Err(PipelineError::Transport("MQTT client is not connected".to_string())),
        };

        // MQTT has no message keys, the key only matters to keyed buses
        client
            .publish(&message.topic, QoS::AtLeastOnce, false, message.payload)
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        debug!("Published message to: {}", message.topic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PipelineError> {
        let Some(mut connection) = self.connection.lock().await.take() else {
            debug!("MQTT disconnect requested without a connection");
            return Ok(());
        };

        // The request channel can be full when the broker stalls
        let result = match tokio::time::timeout(
            self.config.disconnect_timeout,
            connection.client.disconnect(),
        )
        .await
        {
            Ok(result) => result.map_err(|e| PipelineError::Transport(e.to_string())),
            Err(_) => Err(PipelineError::Transport(format!(
                "Disconnect request not accepted within {:?}",
                self.config.disconnect_timeout
            ))),
        };

        if tokio::time::timeout(self.config.disconnect_timeout, &mut connection.poller)
            .await
            .is_err()
        {
            warn!(
                "MQTT event loop did not stop within {:?}, aborting",
                self.config.disconnect_timeout
            );
            connection.poller.abort();
        }

        info!("MQTT disconnected");
        result
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), PipelineError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(PipelineError::ConnectFailure(e.to_string())),
        }
    }
}

/// Drive the event loop until the disconnect packet has gone out
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                return;
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                trace!("Publish acknowledged: {}", ack.pkid);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT poll error: {}, reconnecting...", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
