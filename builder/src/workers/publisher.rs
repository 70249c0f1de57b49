//! Log publisher worker
//!
//! Log events are queued on a bounded channel and delivered in order by a
//! dedicated sender task, so a slow or failing bus never blocks or fails the
//! build. When the queue is full the newest event is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::models::deployment::{DeploymentContext, LogEvent, LogStatus};
use crate::transport::topics::Topics;
use crate::transport::{BusMessage, LogTransport};

/// Publisher options
#[derive(Debug, Clone)]
pub struct Options {
    /// Topic log events are sent to
    pub topic: String,

    /// Maximum number of events waiting to be sent
    pub queue_capacity: usize,

    /// How long a milestone event waits for queue space before it is dropped
    pub stage_timeout: Duration,

    /// How long shutdown waits for queued events to be sent
    pub drain_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            topic: Topics::CONTAINER_LOGS.to_string(),
            queue_capacity: 1024,
            stage_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Delivery counters for a publisher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Events accepted by the transport
    pub sent: u64,

    /// Events the transport rejected
    pub failed: u64,

    /// Events never handed to the transport (queue full, closed, or undrained)
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PublisherStats {
        PublisherStats {
            sent: self.sent.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
        }
    }
}

/// Cheap, cloneable handle used to emit log events
#[derive(Clone)]
pub struct LogPublisher {
    tx: mpsc::Sender<LogEvent>,
    context: Arc<DeploymentContext>,
    counters: Arc<Counters>,
    stage_timeout: Duration,
}

impl LogPublisher {
    /// Start the sender task and return the publishing handle with its worker
    pub fn spawn(
        transport: Arc<dyn LogTransport>,
        context: DeploymentContext,
        options: &Options,
    ) -> (LogPublisher, PublisherWorker) {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());

        let handle = tokio::spawn(run(
            rx,
            close_rx,
            transport,
            options.topic.clone(),
            counters.clone(),
        ));

        let publisher = LogPublisher {
            tx,
            context: Arc::new(context),
            counters: counters.clone(),
            stage_timeout: options.stage_timeout,
        };
        let worker = PublisherWorker {
            close_tx: Some(close_tx),
            handle,
            counters,
            drain_timeout: options.drain_timeout,
        };

        (publisher, worker)
    }

    /// Queue an event without waiting. Drops the event if the queue is full.
    pub fn publish(&self, message: impl Into<String>, status: LogStatus) {
        let event = LogEvent::new(&self.context, message, status);
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::SeqCst);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                debug!("Log queue full, dropping {} event: {}", event.status, event.log);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                debug!("Log queue closed, dropping {} event: {}", event.status, event.log);
            }
        }
    }

    /// Queue a pipeline milestone, waiting a bounded time for queue space but
    /// never for delivery. A stalled bus cannot hold up the pipeline.
    pub async fn publish_stage(&self, message: impl Into<String>, status: LogStatus) {
        let event = LogEvent::new(&self.context, message, status);
        let (queue, event) = match self.tx.send_timeout(event, self.stage_timeout).await {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Err(mpsc::error::SendTimeoutError::Timeout(event)) => ("full", event),
            Err(mpsc::error::SendTimeoutError::Closed(event)) => ("closed", event),
        };

        self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        if event.status.is_terminal() {
            error!("Log queue {}, dropping terminal {} event: {}", queue, event.status, event.log);
        } else {
            warn!("Log queue {}, dropping {} event: {}", queue, event.status, event.log);
        }
    }

    /// Current delivery counters
    pub fn stats(&self) -> PublisherStats {
        self.counters.snapshot()
    }
}

/// Owner of the sender task
pub struct PublisherWorker {
    close_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
    counters: Arc<Counters>,
    drain_timeout: Duration,
}

impl PublisherWorker {
    /// Stop accepting events and wait (bounded) for queued events to be sent
    pub async fn shutdown(mut self) -> PublisherStats {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }

        match tokio::time::timeout(self.drain_timeout, &mut self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Log sender task failed: {}", e),
            Err(_) => {
                warn!(
                    "Log queue not drained within {:?}, dropping remaining events",
                    self.drain_timeout
                );
                self.handle.abort();
            }
        }

        let mut stats = self.counters.snapshot();
        // Events still queued after an abort never reached the transport
        let queued = self.counters.queued.load(Ordering::SeqCst);
        stats.dropped += queued.saturating_sub(stats.sent + stats.failed);
        info!(
            "Log publisher stopped: {} sent, {} failed, {} dropped",
            stats.sent, stats.failed, stats.dropped
        );
        stats
    }
}

async fn run(
    mut rx: mpsc::Receiver<LogEvent>,
    mut close_rx: oneshot::Receiver<()>,
    transport: Arc<dyn LogTransport>,
    topic: String,
    counters: Arc<Counters>,
) {
    let mut closing = false;

    loop {
        let event = if closing {
            rx.recv().await
        } else {
            tokio::select! {
                event = rx.recv() => event,
                _ = &mut close_rx => {
                    // Buffered events are still delivered after close
                    rx.close();
                    closing = true;
                    continue;
                }
            }
        };

        let Some(event) = event else {
            break;
        };

        deliver(transport.as_ref(), &topic, &event, &counters).await;
    }

    debug!("Log sender task finished");
}

async fn deliver(transport: &dyn LogTransport, topic: &str, event: &LogEvent, counters: &Counters) {
    let payload = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::SeqCst);
            warn!("Failed to serialize log event: {}", e);
            return;
        }
    };

    let message = BusMessage {
        topic: topic.to_string(),
        key: Some(Topics::LOG_KEY.to_string()),
        payload,
    };

    match transport.send(message).await {
        Ok(()) => {
            counters.sent.fetch_add(1, Ordering::SeqCst);
            trace!("Sent {} event", event.status);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::SeqCst);
            warn!("Failed to publish {} event: {}", event.status, e);
        }
    }
}
