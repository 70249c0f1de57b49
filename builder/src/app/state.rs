//! Pipeline state shared by every stage

use std::sync::Arc;

use object_store::ObjectStore;
use tracing::info;

use crate::app::options::{kafka_config, mqtt_config, PipelineOptions};
use crate::app::settings::Settings;
use crate::deploy::executor::ProcessExecutor;
use crate::deploy::uploader::ArtifactUploader;
use crate::errors::PipelineError;
use crate::models::deployment::DeploymentContext;
use crate::storage::s3::build_store;
use crate::transport::mqtt::MqttTransport;
use crate::transport::{BusKind, LogTransport};

/// Everything a run needs, built once and passed by reference
pub struct PipelineContext {
    /// Deployment identifiers attached to every log event
    pub deployment: DeploymentContext,

    /// Stage options
    pub options: PipelineOptions,

    /// Message bus the build logs go to
    pub transport: Arc<dyn LogTransport>,

    /// Store the artifacts go to
    pub store: Arc<dyn ObjectStore>,
}

impl PipelineContext {
    pub fn new(
        deployment: DeploymentContext,
        options: PipelineOptions,
        transport: Arc<dyn LogTransport>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            deployment,
            options,
            transport,
            store,
        }
    }

    /// Build the bus transport and S3 store described by the settings
    pub fn init(settings: &Settings) -> Result<Self, PipelineError> {
        info!("Initializing pipeline context...");

        let deployment = DeploymentContext::new(&settings.project_id, &settings.deployment_id);
        let transport = build_transport(settings)?;
        let store = build_store(&settings.storage)?;

        Ok(Self::new(
            deployment,
            PipelineOptions::from_settings(settings),
            transport,
            store,
        ))
    }

    pub fn executor(&self) -> ProcessExecutor {
        ProcessExecutor::new(self.options.build.clone())
    }

    pub fn uploader(&self) -> ArtifactUploader {
        ArtifactUploader::new(
            self.store.clone(),
            self.options.content_types.clone(),
            &self.deployment.project_id,
            self.options.upload.clone(),
        )
    }
}

fn build_transport(settings: &Settings) -> Result<Arc<dyn LogTransport>, PipelineError> {
    match settings.bus.kind {
        BusKind::Mqtt => Ok(Arc::new(MqttTransport::new(mqtt_config(settings)?))),
        BusKind::Kafka => kafka_transport(settings),
    }
}

#[cfg(feature = "kafka")]
fn kafka_transport(settings: &Settings) -> Result<Arc<dyn LogTransport>, PipelineError> {
    use crate::transport::kafka::KafkaTransport;

    Ok(Arc::new(KafkaTransport::new(kafka_config(settings)?)))
}

#[cfg(not(feature = "kafka"))]
fn kafka_transport(settings: &Settings) -> Result<Arc<dyn LogTransport>, PipelineError> {
    kafka_config(settings)?;
    Err(PipelineError::ConfigError(
        "Kafka bus requested but build-runner was built without the `kafka` feature".to_string(),
    ))
}
