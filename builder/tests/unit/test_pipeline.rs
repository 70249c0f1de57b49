//! End-to-end pipeline runs against fake bus and in-memory store

use std::future::pending;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, ObjectStore};

use build_runner::app::run::run;
use build_runner::deploy::fsm::PipelineState;
use build_runner::errors::PipelineError;
use build_runner::models::deployment::LogStatus;

use crate::common::{FakeTransport, Harness};

async fn stored_keys(harness: &Harness) -> Vec<String> {
    let mut keys: Vec<String> = harness
        .store
        .list(None)
        .map(|meta| meta.unwrap().location.to_string())
        .collect()
        .await;
    keys.sort();
    keys
}

fn site(harness: &Harness) {
    harness.dist_file("index.html", b"<html>hi</html>");
    harness.dist_file("assets/logo.png", b"png-bytes");
}

#[tokio::test]
async fn test_successful_build_goes_live() {
    let harness = Harness::new(Arc::new(FakeTransport::default()));
    site(&harness);

    let summary = run(&harness.context("exit 0"), pending()).await;

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.state, PipelineState::Completed);
    assert_eq!(summary.uploaded, 2);
    assert!(summary.error.is_none());
    assert_eq!(
        stored_keys(&harness).await,
        vec![
            "__outputs/proj-1/assets/logo.png".to_string(),
            "__outputs/proj-1/index.html".to_string(),
        ]
    );

    let index = harness
        .store
        .get(&ObjectPath::from("__outputs/proj-1/index.html"))
        .await
        .unwrap();
    let content_type = index
        .attributes
        .get(&Attribute::ContentType)
        .map(|v| AsRef::<str>::as_ref(v).to_string());
    assert_eq!(content_type.as_deref(), Some("text/html"));

    assert_eq!(
        harness.transport.logs().await,
        vec![
            (LogStatus::Started, "Build process initiated".to_string()),
            (LogStatus::Running, "Starting build".to_string()),
            (LogStatus::Success, "Build completed successfully".to_string()),
            (LogStatus::Info, "Beginning upload of 2 files".to_string()),
            (LogStatus::Completed, "Website is Live".to_string()),
        ]
    );
    assert!(harness
        .transport
        .keys
        .lock()
        .await
        .iter()
        .all(|key| key.as_deref() == Some("log")));

    assert_eq!(harness.transport.disconnects(), 1);
    assert_eq!(harness.transport.sends_after_disconnect.load(Ordering::SeqCst), 0);
    assert_eq!(summary.publisher.sent, 5);
    assert_eq!(summary.history.last(), Some(&PipelineState::Disconnected));
}

#[tokio::test]
async fn test_build_output_precedes_outcome() {
    let harness = Harness::new(Arc::new(FakeTransport::default()));
    site(&harness);

    let summary = run(&harness.context("echo one; echo two"), pending()).await;
    assert_eq!(summary.exit_code(), 0);

    let logs = harness.transport.logs().await;
    let position = |message: &str| logs.iter().position(|(_, log)| log == message).unwrap();
    assert!(position("Build output: one") < position("Build output: two"));
    assert!(position("Build output: two") < position("Build completed successfully"));
}

#[tokio::test]
async fn test_failed_build_uploads_nothing() {
    let harness = Harness::new(Arc::new(FakeTransport::default()));
    site(&harness);

    let summary = run(&harness.context("exit 2"), pending()).await;

    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.state, PipelineState::BuildFailed);
    assert_eq!(summary.uploaded, 0);
    assert!(matches!(
        summary.error,
        Some(PipelineError::BuildFailure { exit_code: Some(2) })
    ));
    assert!(stored_keys(&harness).await.is_empty());

    assert_eq!(
        harness.transport.logs_with_status(LogStatus::Failed).await,
        vec![
            "Build failed with exit code 2".to_string(),
            "Fatal script error: Build process exited with code 2".to_string(),
        ]
    );
    assert!(harness
        .transport
        .logs_with_status(LogStatus::Success)
        .await
        .is_empty());
    assert_eq!(harness.transport.disconnects(), 1);
}

#[tokio::test]
async fn test_missing_dist_folder() {
    let harness = Harness::new(Arc::new(FakeTransport::default()));

    let summary = run(&harness.context("exit 0"), pending()).await;

    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.state, PipelineState::UploadFailed);
    assert!(matches!(summary.error, Some(PipelineError::MissingArtifact(_))));
    assert_eq!(summary.uploaded, 0);
    assert!(stored_keys(&harness).await.is_empty());
    assert_eq!(harness.transport.disconnects(), 1);

    let failed = harness.transport.logs_with_status(LogStatus::Failed).await;
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with("Fatal script error: Dist folder not found"));
}

#[tokio::test]
async fn test_rejected_logs_do_not_change_outcome() {
    let harness = Harness::new(FakeTransport::rejecting());
    site(&harness);

    let summary = run(&harness.context("echo building"), pending()).await;

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.state, PipelineState::Completed);
    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.publisher.sent, 0);
    assert_eq!(summary.publisher.failed, 6);
    assert_eq!(harness.transport.disconnects(), 1);
}

#[tokio::test]
async fn test_connect_failure_skips_build() {
    let harness = Harness::new(FakeTransport::refusing());
    site(&harness);

    let summary = run(&harness.context("touch built.txt"), pending()).await;

    assert_eq!(summary.exit_code(), 1);
    assert!(matches!(summary.error, Some(PipelineError::ConnectFailure(_))));
    assert_eq!(summary.state, PipelineState::Connecting);
    assert_eq!(
        summary.history,
        vec![
            PipelineState::Init,
            PipelineState::Connecting,
            PipelineState::Disconnected,
        ]
    );
    assert!(!harness.working_dir().join("built.txt").exists());
    assert!(stored_keys(&harness).await.is_empty());

    // Only the fatal event is attempted, and it fails
    assert_eq!(summary.publisher.failed, 1);
    assert_eq!(harness.transport.disconnects(), 1);
}

#[tokio::test]
async fn test_shutdown_signal_cancels_build() {
    let harness = Harness::new(Arc::new(FakeTransport::default()));
    site(&harness);

    let started = Instant::now();
    let summary = run(
        &harness.context("sleep 30; true"),
        tokio::time::sleep(Duration::from_millis(200)),
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.state, PipelineState::BuildFailed);
    assert!(matches!(summary.error, Some(PipelineError::Cancelled(_))));
    assert!(stored_keys(&harness).await.is_empty());
    assert_eq!(
        harness.transport.logs_with_status(LogStatus::Failed).await,
        vec!["Fatal script error: Cancelled: shutdown signal received".to_string()]
    );
    assert_eq!(harness.transport.disconnects(), 1);
}

#[tokio::test]
async fn test_stalled_bus_does_not_block_pipeline() {
    let harness = Harness::new(FakeTransport::stalled());
    site(&harness);

    let mut context = harness.context("seq 1 3000");
    context.options.publisher.stage_timeout = Duration::from_millis(100);
    context.options.publisher.drain_timeout = Duration::from_millis(200);

    let summary = tokio::time::timeout(Duration::from_secs(20), run(&context, pending()))
        .await
        .expect("pipeline blocked on a stalled bus");

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.state, PipelineState::Completed);
    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.publisher.sent, 0);
    assert!(summary.publisher.dropped > 0);
    assert_eq!(harness.transport.disconnects(), 1);
}
