//! Pipeline configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::app::settings::Settings;
use crate::deploy::content_type::ContentTypes;
use crate::deploy::executor::BuildOptions;
use crate::deploy::uploader::UploadOptions;
use crate::errors::PipelineError;
use crate::transport::kafka::KafkaConfig;
use crate::transport::mqtt::MqttConfig;
use crate::transport::Credentials;
use crate::transport::topics::Topics;
use crate::workers::publisher;

/// Main pipeline options
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Build command
    pub build: BuildOptions,

    /// Folder uploaded after a successful build
    pub dist_dir: PathBuf,

    /// Artifact upload
    pub upload: UploadOptions,

    /// Extension to MIME table for uploads
    pub content_types: ContentTypes,

    /// Log publisher
    pub publisher: publisher::Options,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        let build = BuildOptions::default();
        let dist_dir = build.working_dir.join("dist");
        Self {
            build,
            dist_dir,
            upload: UploadOptions::default(),
            content_types: ContentTypes::default(),
            publisher: publisher::Options::default(),
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            build: BuildOptions {
                command: settings.build.command.clone(),
                working_dir: settings.build.working_dir.clone(),
                stderr_status: settings.build.stderr_status,
                timeout: settings.build.timeout_secs.map(Duration::from_secs),
                ..Default::default()
            },
            dist_dir: settings.dist_dir(),
            upload: UploadOptions {
                concurrency: settings.storage.upload_concurrency,
                cleanup_on_failure: settings.storage.cleanup_on_upload_failure,
                ..Default::default()
            },
            content_types: ContentTypes::default()
                .with_overrides(&settings.storage.content_types)
                .with_fallback(settings.storage.default_content_type.clone()),
            publisher: publisher::Options {
                queue_capacity: settings.publisher.queue_capacity,
                stage_timeout: Duration::from_secs(settings.publisher.stage_timeout_secs),
                drain_timeout: Duration::from_secs(settings.publisher.drain_timeout_secs),
                ..Default::default()
            },
        }
    }
}

/// Broker credentials, only when both halves are set
fn credentials(settings: &Settings) -> Result<Option<Credentials>, PipelineError> {
    match (&settings.bus.username, &settings.bus.password) {
        (Some(username), Some(password)) => Ok(Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        })),
        (None, None) => Ok(None),
        _ => Err(PipelineError::ConfigError(
            "BUS_USERNAME and BUS_PASSWORD must be set together".to_string(),
        )),
    }
}

/// MQTT transport options for the deployment's bus connection
pub fn mqtt_config(settings: &Settings) -> Result<MqttConfig, PipelineError> {
    Ok(MqttConfig {
        address: settings.broker_address()?,
        credentials: credentials(settings)?,
        client_id: Topics::client_id(&settings.deployment_id),
        connect_timeout: Duration::from_secs(settings.bus.connect_timeout_secs),
        ..Default::default()
    })
}

/// Kafka transport options for the deployment's bus connection
pub fn kafka_config(settings: &Settings) -> Result<KafkaConfig, PipelineError> {
    Ok(KafkaConfig {
        brokers: KafkaConfig::parse_brokers(&settings.bus.broker)?,
        client_id: Topics::client_id(&settings.deployment_id),
        use_tls: settings.bus.tls,
        ca_cert_path: settings.bus.ca_cert_path.clone(),
        credentials: credentials(settings)?,
        connect_timeout: Duration::from_secs(settings.bus.connect_timeout_secs),
        ..Default::default()
    })
}
