//! Settings file and environment management

use std::collections::HashMap;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::PipelineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::deployment::LogStatus;
use crate::transport::kafka::KafkaConfig;
use crate::transport::mqtt::MqttAddress;
use crate::transport::BusKind;

/// Build runner settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Directory for rolling log files. Disabled when absent.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Project the build belongs to
    #[serde(default)]
    pub project_id: String,

    /// Deployment being built
    #[serde(default)]
    pub deployment_id: String,

    /// Build command configuration
    #[serde(default)]
    pub build: BuildSettings,

    /// Message bus configuration
    #[serde(default)]
    pub bus: BusSettings,

    /// Object store configuration
    #[serde(default)]
    pub storage: StorageSettings,

    /// Log publisher configuration
    #[serde(default)]
    pub publisher: PublisherSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_dir: None,
            project_id: String::new(),
            deployment_id: String::new(),
            build: BuildSettings::default(),
            bus: BusSettings::default(),
            storage: StorageSettings::default(),
            publisher: PublisherSettings::default(),
        }
    }
}

/// Build command settings
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSettings {
    /// Shell command line
    #[serde(default = "default_build_command")]
    pub command: String,

    /// Directory the command runs in
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Output folder to upload, `<working_dir>/dist` when absent
    #[serde(default)]
    pub dist_dir: Option<PathBuf>,

    /// Status attached to stderr lines
    #[serde(default = "default_stderr_status")]
    pub stderr_status: LogStatus,

    /// Kill the build after this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_build_command() -> String {
    "npm install && npm run build".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_stderr_status() -> LogStatus {
    LogStatus::Failed
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            working_dir: default_working_dir(),
            dist_dir: None,
            stderr_status: default_stderr_status(),
            timeout_secs: None,
        }
    }
}

/// Message bus settings
#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    /// Bus implementation
    #[serde(default)]
    pub kind: BusKind,

    /// Broker as `host:port`. Kafka takes a comma separated list.
    #[serde(default)]
    pub broker: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<SecretString>,

    /// Use TLS
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    /// Seconds allowed for the single connection attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    15
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            kind: BusKind::default(),
            broker: String::new(),
            username: None,
            password: None,
            tls: true,
            ca_cert_path: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Object store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint of an S3-compatible store
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<SecretString>,

    /// Extension to MIME overrides
    #[serde(default)]
    pub content_types: HashMap<String, String>,

    /// MIME type for unmapped extensions
    #[serde(default)]
    pub default_content_type: Option<String>,

    /// Uploads in flight at once
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Delete already uploaded objects when an upload fails
    #[serde(default)]
    pub cleanup_on_upload_failure: bool,
}

fn default_region() -> String {
    "ap-south-1".to_string()
}

fn default_upload_concurrency() -> usize {
    1
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            content_types: HashMap::new(),
            default_content_type: None,
            upload_concurrency: default_upload_concurrency(),
            cleanup_on_upload_failure: false,
        }
    }
}

/// Log publisher settings
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherSettings {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds a milestone event may wait for queue space
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Seconds allowed to flush queued events on shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_stage_timeout() -> u64 {
    5
}

fn default_drain_timeout() -> u64 {
    10
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            stage_timeout_secs: default_stage_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Settings {
    /// Load settings: `.env`, then the optional settings file, then the process environment
    pub async fn load(file: Option<&File>) -> Result<Self, PipelineError> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut settings = match file {
            Some(file) => file.read_json::<Settings>().await?,
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Override fields with the variables found by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level.parse().map_err(PipelineError::ConfigError)?;
        }
        if let Some(id) = var("PROJECT_ID") {
            self.project_id = id;
        }
        if let Some(id) = var("DEPLOYMENT_ID") {
            self.deployment_id = id;
        }

        if let Some(command) = var("BUILD_COMMAND") {
            self.build.command = command;
        }
        if let Some(dir) = var("WORKING_DIR") {
            self.build.working_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("DIST_DIR") {
            self.build.dist_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = var("BUILD_TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|_| {
                PipelineError::ConfigError(format!("Invalid BUILD_TIMEOUT_SECS: {secs}"))
            })?;
            self.build.timeout_secs = Some(secs);
        }

        if let Some(kind) = var("BUS_KIND") {
            self.bus.kind = kind.parse().map_err(PipelineError::ConfigError)?;
        }
        if let Some(broker) = var("BUS_BROKER") {
            self.bus.broker = broker;
        }
        if let Some(username) = var("BUS_USERNAME") {
            self.bus.username = Some(username);
        }
        if let Some(password) = var("BUS_PASSWORD") {
            self.bus.password = Some(SecretString::from(password));
        }
        if let Some(path) = var("BUS_CA_CERT") {
            self.bus.ca_cert_path = Some(path);
        }
        if let Some(tls) = var("BUS_TLS") {
            self.bus.tls = parse_bool("BUS_TLS", &tls)?;
        }

        if let Some(key) = var("AWS_ACCESS_KEY_ID") {
            self.storage.access_key_id = Some(key);
        }
        if let Some(secret) = var("AWS_SECRET_ACCESS_KEY") {
            self.storage.secret_access_key = Some(SecretString::from(secret));
        }
        if let Some(region) = var("AWS_REGION") {
            self.storage.region = region;
        }
        if let Some(bucket) = var("AWS_BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        if let Some(endpoint) = var("AWS_ENDPOINT") {
            self.storage.endpoint = Some(endpoint);
        }

        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.project_id.trim().is_empty() {
            return Err(PipelineError::ConfigError("PROJECT_ID is not set".to_string()));
        }
        if self.deployment_id.trim().is_empty() {
            return Err(PipelineError::ConfigError("DEPLOYMENT_ID is not set".to_string()));
        }
        if self.build.command.trim().is_empty() {
            return Err(PipelineError::ConfigError("Build command is empty".to_string()));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(PipelineError::ConfigError("AWS_BUCKET_NAME is not set".to_string()));
        }
        if self.storage.upload_concurrency == 0 {
            return Err(PipelineError::ConfigError(
                "upload_concurrency must be at least 1".to_string(),
            ));
        }
        if self.publisher.queue_capacity == 0 {
            return Err(PipelineError::ConfigError(
                "publisher.queue_capacity must be at least 1".to_string(),
            ));
        }
        match self.bus.kind {
            BusKind::Mqtt => {
                self.broker_address()?;
            }
            BusKind::Kafka => {
                KafkaConfig::parse_brokers(&self.bus.broker)?;
            }
        }
        Ok(())
    }

    /// Parsed MQTT broker address
    pub fn broker_address(&self) -> Result<MqttAddress, PipelineError> {
        let mut address = MqttAddress::parse(&self.bus.broker)?;
        address.use_tls = self.bus.tls;
        address.ca_cert_path = self.bus.ca_cert_path.clone();
        Ok(address)
    }

    /// Folder uploaded after a successful build
    pub fn dist_dir(&self) -> PathBuf {
        self.build
            .dist_dir
            .clone()
            .unwrap_or_else(|| self.build.working_dir.join("dist"))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PipelineError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PipelineError::ConfigError(format!("Invalid {key}: {value}"))),
    }
}
