//! Shared fakes for pipeline tests

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tokio::sync::Mutex;

use build_runner::app::options::PipelineOptions;
use build_runner::app::state::PipelineContext;
use build_runner::deploy::executor::BuildOptions;
use build_runner::errors::PipelineError;
use build_runner::models::deployment::{DeploymentContext, LogEvent, LogStatus};
use build_runner::transport::{BusMessage, LogTransport};

/// Bus double: records accepted events and counts lifecycle calls
#[derive(Default)]
pub struct FakeTransport {
    pub events: Mutex<Vec<LogEvent>>,
    pub keys: Mutex<Vec<Option<String>>>,
    pub connects: AtomicUsize,
    pub sends: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub sends_after_disconnect: AtomicUsize,
    pub refuse_connect: AtomicBool,
    pub reject_sends: AtomicBool,
    pub stall_sends: AtomicBool,
}

impl FakeTransport {
    pub fn refusing() -> Arc<Self> {
        let transport = Self::default();
        transport.refuse_connect.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn rejecting() -> Arc<Self> {
        let transport = Self::default();
        transport.reject_sends.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Connects, then never completes a send
    pub fn stalled() -> Arc<Self> {
        let transport = Self::default();
        transport.stall_sends.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub async fn logs(&self) -> Vec<(LogStatus, String)> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| (e.status, e.log.clone()))
            .collect()
    }

    pub async fn logs_with_status(&self, status: LogStatus) -> Vec<String> {
        self.logs()
            .await
            .into_iter()
            .filter(|(s, _)| *s == status)
            .map(|(_, log)| log)
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogTransport for FakeTransport {
    async fn connect(&self) -> Result<(), PipelineError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(PipelineError::ConnectFailure("connection refused".to_string()));
        }
        Ok(())
    }

    async fn send(&self, message: BusMessage) -> Result<(), PipelineError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.disconnects() > 0 {
            self.sends_after_disconnect.fetch_add(1, Ordering::SeqCst);
        }
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.reject_sends.load(Ordering::SeqCst)
            || self.refuse_connect.load(Ordering::SeqCst)
        {
            return Err(PipelineError::Transport("not accepted".to_string()));
        }
        let event: LogEvent = serde_json::from_slice(&message.payload)?;
        self.events.lock().await.push(event);
        self.keys.lock().await.push(message.key);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PipelineError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A workspace with a working dir, its dist folder path and an in-memory store
pub struct Harness {
    pub root: tempfile::TempDir,
    pub transport: Arc<FakeTransport>,
    pub store: Arc<InMemory>,
}

impl Harness {
    pub fn new(transport: Arc<FakeTransport>) -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            transport,
            store: Arc::new(InMemory::new()),
        }
    }

    pub fn working_dir(&self) -> &Path {
        self.root.path()
    }

    /// Put a file in the dist folder before the build runs
    pub fn dist_file(&self, relative: &str, contents: &[u8]) {
        let path = self.root.path().join("dist").join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn context(&self, command: &str) -> PipelineContext {
        let build = BuildOptions {
            command: command.to_string(),
            working_dir: self.working_dir().to_path_buf(),
            ..Default::default()
        };
        let options = PipelineOptions {
            dist_dir: self.working_dir().join("dist"),
            build,
            ..Default::default()
        };
        let store: Arc<dyn ObjectStore> = self.store.clone();
        PipelineContext::new(
            DeploymentContext::new("proj-1", "dep-1"),
            options,
            self.transport.clone(),
            store,
        )
    }
}
