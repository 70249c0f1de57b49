//! Artifact uploader
//!
//! Walks the dist folder and streams every regular file into the object store
//! under `<prefix>/<project id>/<relative path>`.

use std::path::{Component, Path};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::deploy::content_type::ContentTypes;
use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::build::ArtifactDescriptor;
use crate::models::deployment::LogStatus;
use crate::workers::publisher::LogPublisher;

/// Upload configuration
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// First segment of every object key
    pub key_prefix: String,

    /// Maximum uploads in flight, 1 uploads files one after the other
    pub concurrency: usize,

    /// Delete already uploaded objects when an upload fails
    pub cleanup_on_failure: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            key_prefix: "__outputs".to_string(),
            concurrency: 1,
            cleanup_on_failure: false,
        }
    }
}

/// Uploads build artifacts to the object store
pub struct ArtifactUploader {
    store: Arc<dyn ObjectStore>,
    content_types: ContentTypes,
    project_id: String,
    options: UploadOptions,
}

impl ArtifactUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        content_types: ContentTypes,
        project_id: impl Into<String>,
        options: UploadOptions,
    ) -> Self {
        Self {
            store,
            content_types,
            project_id: project_id.into(),
            options,
        }
    }

    /// Object key for a path relative to the dist folder
    pub fn object_key(&self, relative_path: &str) -> String {
        format!("{}/{}/{}", self.options.key_prefix, self.project_id, relative_path)
    }

    /// List the regular files under the dist folder, sorted by path
    pub async fn collect(&self, dist_dir: &Path) -> Result<Vec<ArtifactDescriptor>, PipelineError> {
        if !Dir::new(dist_dir).exists().await {
            return Err(PipelineError::MissingArtifact(dist_dir.to_path_buf()));
        }

        let root = dist_dir.to_path_buf();
        let content_types = self.content_types.clone();
        tokio::task::spawn_blocking(move || walk(&root, &content_types))
            .await
            .map_err(|e| PipelineError::Internal(format!("Artifact scan failed: {e}")))?
    }

    /// Upload every file under the dist folder. Returns the number of files uploaded.
    ///
    /// The first failing upload stops the run. Objects uploaded before it stay
    /// in place unless `cleanup_on_failure` is set.
    pub async fn upload(
        &self,
        dist_dir: &Path,
        publisher: &LogPublisher,
    ) -> Result<usize, PipelineError> {
        let artifacts = self.collect(dist_dir).await?;

        info!("Starting to upload {} files from {}", artifacts.len(), dist_dir.display());
        publisher
            .publish_stage(format!("Beginning upload of {} files", artifacts.len()), LogStatus::Info)
            .await;

        let mut uploads = stream::iter(artifacts.iter().map(|artifact| self.upload_one(artifact)))
            .buffer_unordered(self.options.concurrency.max(1));

        let mut uploaded = Vec::with_capacity(artifacts.len());
        let mut failure = None;
        while let Some(result) = uploads.next().await {
            match result {
                Ok(key) => uploaded.push(key),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        // Stop any uploads still in flight, they never complete
        drop(uploads);

        if let Some(e) = failure {
            error!("Upload failed after {} of {} files: {}", uploaded.len(), artifacts.len(), e);
            if self.options.cleanup_on_failure {
                self.remove(&uploaded, publisher).await;
            }
            return Err(e);
        }

        info!("Uploaded {} files", uploaded.len());
        Ok(uploaded.len())
    }

    async fn upload_one(&self, artifact: &ArtifactDescriptor) -> Result<String, PipelineError> {
        let key = self.object_key(&artifact.relative_path);
        let failure = |reason: String| PipelineError::UploadFailure {
            key: key.clone(),
            reason,
        };

        debug!("uploading {}", artifact.absolute_path.display());

        let mut attributes = Attributes::new();
        if let Some(content_type) = &artifact.content_type {
            attributes.insert(Attribute::ContentType, content_type.clone().into());
        }

        let mut source = File::new(&artifact.absolute_path)
            .open()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let mut writer = BufWriter::new(self.store.clone(), ObjectPath::from(key.as_str()))
            .with_attributes(attributes);

        let written: std::io::Result<()> = async {
            tokio::io::copy(&mut source, &mut writer).await?;
            writer.shutdown().await
        }
        .await;

        if let Err(e) = written {
            if let Err(abort_err) = writer.abort().await {
                warn!("Failed to abort upload of {}: {}", key, abort_err);
            }
            return Err(failure(e.to_string()));
        }

        debug!("uploaded {}", key);
        Ok(key)
    }

    async fn remove(&self, keys: &[String], publisher: &LogPublisher) {
        let mut removed = 0;
        for key in keys {
            match self.store.delete(&ObjectPath::from(key.as_str())).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove partial upload {}: {}", key, e),
            }
        }

        info!("Removed {} of {} partially uploaded files", removed, keys.len());
        publisher.publish(
            format!("Removed {} partially uploaded files", removed),
            LogStatus::Info,
        );
    }
}

fn walk(root: &Path, content_types: &ContentTypes) -> Result<Vec<ArtifactDescriptor>, PipelineError> {
    let mut artifacts = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| PipelineError::IoError(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| PipelineError::Internal(e.to_string()))?;

        artifacts.push(ArtifactDescriptor {
            relative_path: key_path(relative),
            absolute_path: entry.path().to_path_buf(),
            content_type: content_types.lookup(entry.path()).map(str::to_string),
        });
    }

    Ok(artifacts)
}

/// `/`-joined form of a relative path, independent of the host separator
fn key_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
