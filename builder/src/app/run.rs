//! Pipeline run: connect, build, upload, disconnect

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::app::state::PipelineContext;
use crate::deploy::fsm::{PipelineEvent, PipelineFsm, PipelineState};
use crate::errors::PipelineError;
use crate::models::deployment::LogStatus;
use crate::workers::publisher::{LogPublisher, PublisherStats};

/// What a finished run looks like
#[derive(Debug)]
pub struct RunSummary {
    /// Last state before disconnecting
    pub state: PipelineState,

    /// Every state visited
    pub history: Vec<PipelineState>,

    /// Files uploaded
    pub uploaded: usize,

    /// The fatal error, if any
    pub error: Option<PipelineError>,

    /// Log delivery counters
    pub publisher: PublisherStats,
}

impl RunSummary {
    /// Process exit status: 0 only when build and upload both completed
    pub fn exit_code(&self) -> i32 {
        match (&self.state, &self.error) {
            (PipelineState::Completed, None) => 0,
            (_, Some(e)) => e.exit_code(),
            _ => 1,
        }
    }
}

/// Run the pipeline once.
///
/// The transport is disconnected exactly once on every path, after every log
/// event has been issued. `shutdown_signal` cancels the build or upload in
/// progress.
pub async fn run(
    context: &PipelineContext,
    shutdown_signal: impl Future<Output = ()> + Send,
) -> RunSummary {
    info!(
        "Starting pipeline for project {} deployment {}",
        context.deployment.project_id, context.deployment.deployment_id
    );

    let mut fsm = PipelineFsm::new();
    transition(&mut fsm, PipelineEvent::Connect);

    let connected = context.transport.connect().await;

    // Spawned even when the connection failed so the fatal event is still attempted
    let (publisher, worker) = LogPublisher::spawn(
        context.transport.clone(),
        context.deployment.clone(),
        &context.options.publisher,
    );

    let result = match connected {
        Err(e) => {
            error!("Failed to connect to the message bus: {}", e);
            Err(e)
        }
        Ok(()) => {
            info!("Connected to the message bus");
            transition(&mut fsm, PipelineEvent::Connected);

            let stages = AssertUnwindSafe(run_stages(context, &publisher, &mut fsm))
                .catch_unwind()
                .map(|result| result.unwrap_or_else(|panic| Err(panicked(panic))));

            tokio::select! {
                result = stages => result,
                _ = shutdown_signal => {
                    warn!("Shutdown signal received, stopping the pipeline");
                    Err(PipelineError::Cancelled("shutdown signal received".to_string()))
                }
            }
        }
    };

    let (uploaded, error) = match result {
        Ok(uploaded) => {
            publisher
                .publish_stage("Website is Live", LogStatus::Completed)
                .await;
            info!("Website is live, {} files uploaded", uploaded);
            (uploaded, None)
        }
        Err(e) => {
            error!("Fatal script error: {}", e);
            publisher
                .publish_stage(format!("Fatal script error: {}", e), LogStatus::Failed)
                .await;
            record_failure(&mut fsm, &e);
            (0, Some(e))
        }
    };

    drop(publisher);
    let stats = worker.shutdown().await;
    info!(
        "Log publisher finished: {} sent, {} failed, {} dropped",
        stats.sent, stats.failed, stats.dropped
    );

    if let Err(e) = context.transport.disconnect().await {
        warn!("Failed to disconnect from the message bus: {}", e);
    }
    transition(&mut fsm, PipelineEvent::Disconnect);

    RunSummary {
        state: fsm.outcome(),
        history: fsm.history().to_vec(),
        uploaded,
        error,
        publisher: stats,
    }
}

/// Build, then upload. Only success transitions happen here; failures are
/// recorded by the caller once the stage has stopped.
async fn run_stages(
    context: &PipelineContext,
    publisher: &LogPublisher,
    fsm: &mut PipelineFsm,
) -> Result<usize, PipelineError> {
    publisher
        .publish_stage("Build process initiated", LogStatus::Started)
        .await;

    info!("Build started");
    publisher
        .publish_stage("Starting build", LogStatus::Running)
        .await;

    let outcome = context.executor().run(publisher).await?;
    if !outcome.succeeded {
        return Err(PipelineError::BuildFailure {
            exit_code: outcome.exit_code,
        });
    }

    info!("Build complete");
    publisher
        .publish_stage("Build completed successfully", LogStatus::Success)
        .await;
    fsm.process(PipelineEvent::BuildSucceeded)
        .map_err(PipelineError::StateError)?;

    let uploaded = context
        .uploader()
        .upload(&context.options.dist_dir, publisher)
        .await?;
    fsm.process(PipelineEvent::UploadSucceeded)
        .map_err(PipelineError::StateError)?;

    Ok(uploaded)
}

fn record_failure(fsm: &mut PipelineFsm, error: &PipelineError) {
    let event = match fsm.state() {
        PipelineState::Building => PipelineEvent::BuildFailed(error.to_string()),
        PipelineState::Uploading => PipelineEvent::UploadFailed(error.to_string()),
        // Connection failures and terminal states go straight to disconnect
        _ => return,
    };
    transition(fsm, event);
}

fn transition(fsm: &mut PipelineFsm, event: PipelineEvent) {
    if let Err(e) = fsm.process(event) {
        error!("{}", e);
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> PipelineError {
    let message = if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    };
    PipelineError::Internal(format!("Pipeline stage panicked: {}", message))
}
