//! S3 object store client

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::{ObjectStore, RetryConfig};
use secrecy::ExposeSecret;
use tracing::info;

use crate::app::settings::StorageSettings;
use crate::errors::PipelineError;

/// Build the store artifacts are uploaded to.
///
/// Starts from the `AWS_*` environment, then applies the explicit settings.
pub fn build_store(settings: &StorageSettings) -> Result<Arc<dyn ObjectStore>, PipelineError> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(&settings.bucket)
        .with_region(&settings.region)
        .with_retry(RetryConfig::default());

    if let Some(key_id) = &settings.access_key_id {
        builder = builder.with_access_key_id(key_id);
    }
    if let Some(secret) = &settings.secret_access_key {
        builder = builder.with_secret_access_key(secret.expose_secret());
    }
    if let Some(endpoint) = &settings.endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false)
            .with_allow_http(true);
    }

    let store = builder.build()?;
    info!(
        "Object store ready: bucket {} in {}",
        settings.bucket, settings.region
    );
    Ok(Arc::new(store))
}
