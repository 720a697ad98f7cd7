//! Reliable delivery of GELF messages to the sink.
//!
//! `enqueue` never blocks: messages go into a bounded queue drained by a
//! single background worker that owns the link, retries failed sends and
//! reconnects while the transport is degraded.

pub mod config;
pub mod framing;
pub mod link;
mod worker;

pub use config::{TransportConfig, TransportMode};
pub use framing::FrameEncoder;
pub use link::{Connector, NetworkConnector, SinkLink};

use crate::codec::WireMessage;
use crate::reliability::{MetricKind, PipelineMetrics};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use worker::DeliveryWorker;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to resolve sink address {target}: {reason}")]
    Resolve { target: String, reason: String },
    #[error("Failed to connect to sink at {target}: {reason}")]
    ConnectFailed { target: String, reason: String },
    #[error("Send queue is full")]
    QueueFull,
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Transport is closed")]
    Closed,
    #[error("Message too large: {size} bytes needs {chunks} chunks (max {max})")]
    TooLarge {
        size: usize,
        chunks: usize,
        max: usize,
    },
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Connecting,
    Ready,
    Degraded,
    Draining,
    Closed,
}

impl TransportState {
    /// Numeric code exported as a gauge.
    pub fn code(self) -> i64 {
        match self {
            TransportState::Uninitialized => 0,
            TransportState::Connecting => 1,
            TransportState::Ready => 2,
            TransportState::Degraded => 3,
            TransportState::Draining => 4,
            TransportState::Closed => 5,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Uninitialized => "uninitialized",
            TransportState::Connecting => "connecting",
            TransportState::Ready => "ready",
            TransportState::Degraded => "degraded",
            TransportState::Draining => "draining",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStats {
    pub state: TransportState,
    pub queued: usize,
    pub pending: usize,
    pub enqueued: u64,
    pub sent: u64,
    pub retried: u64,
    /// Messages dropped after exhausting send attempts or the flush grace.
    pub dropped: u64,
    pub queue_full: u64,
    pub reconnects: u64,
    pub degraded_transitions: u64,
}

/// A serialized message waiting for delivery.
#[derive(Debug, Clone)]
pub(crate) struct QueuedSend {
    pub payload: Bytes,
    pub enqueued_at: Instant,
    /// Failed send attempts so far.
    pub attempts: u32,
}

impl QueuedSend {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            payload: Bytes::from(payload),
            enqueued_at: Instant::now(),
            attempts: 0,
        }
    }
}

/// State shared between the transport handle and its worker.
pub(crate) struct Shared {
    state: watch::Sender<TransportState>,
    accepting: AtomicBool,
    /// Accepted messages not yet sent or dropped, wherever they sit.
    outstanding: AtomicUsize,
    metrics: Arc<PipelineMetrics>,
}

impl Shared {
    fn new(metrics: Arc<PipelineMetrics>) -> Self {
        let (state, _) = watch::channel(TransportState::Uninitialized);
        Self {
            state,
            accepting: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
            metrics,
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub(crate) fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// A message left the transport, delivered or dropped.
    pub(crate) fn settle(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Takes every message still unsettled. Only valid once the worker is gone.
    fn take_outstanding(&self) -> usize {
        self.outstanding.swap(0, Ordering::AcqRel)
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Moves to `next` unless already closing. Closed is always reachable.
    /// Entering `Degraded` is counted before watchers are woken, so a
    /// watcher that sees the state also sees the count.
    pub(crate) fn transition(&self, next: TransportState) {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if *current == next || *current == TransportState::Closed {
                return false;
            }
            if *current == TransportState::Draining && next != TransportState::Closed {
                return false;
            }
            if next == TransportState::Degraded {
                self.metrics.increment(MetricKind::DegradedTransitions);
            }
            previous = Some(*current);
            *current = next;
            true
        });

        if let Some(previous) = previous {
            self.metrics.set_transport_state(next.code());
            if next == TransportState::Degraded {
                warn!("Sink transport degraded (was {})", previous);
            } else {
                info!("Sink transport {} -> {}", previous, next);
            }
        }
    }
}

/// Handle to the sink. Cheap to share behind an `Arc`; `enqueue` is safe to
/// call from many consumers at once.
pub struct SinkTransport {
    config: TransportConfig,
    target: String,
    shared: Arc<Shared>,
    queue: mpsc::Sender<QueuedSend>,
    drain: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SinkTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkTransport")
            .field("target", &self.target)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

impl SinkTransport {
    /// Connects to the configured sink. TCP fails fast when the sink name
    /// does not resolve or the first connect fails; UDP always opens and
    /// starts degraded instead, resolving again on every reconnect.
    pub async fn open(
        config: TransportConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, TransportError> {
        config.validate().map_err(TransportError::InvalidConfig)?;

        if config.mode == TransportMode::Tcp {
            let lookup = tokio::time::timeout(
                config.connect_timeout,
                link::resolve(&config.host, config.port),
            )
            .await;
            let failure = match lookup {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("lookup timed out after {:?}", config.connect_timeout)),
            };
            if let Some(reason) = failure {
                return Err(TransportError::Resolve {
                    target: format!("{}:{}", config.host, config.port),
                    reason,
                });
            }
        }

        let connector = NetworkConnector::new(&config);
        Self::open_with_connector(config, Arc::new(connector), metrics).await
    }

    pub async fn open_with_connector(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, TransportError> {
        config.validate().map_err(TransportError::InvalidConfig)?;

        let target = connector.target();
        let shared = Arc::new(Shared::new(metrics));
        shared.transition(TransportState::Connecting);

        let link = match link::connect_with_timeout(connector.as_ref(), config.connect_timeout).await
        {
            Ok(link) => Some(link),
            Err(e) if config.mode == TransportMode::Tcp => {
                shared.transition(TransportState::Closed);
                return Err(TransportError::ConnectFailed {
                    target,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                warn!("Initial connect to {} failed, starting degraded: {}", target, e);
                None
            }
        };

        let (queue, rx) = mpsc::channel(config.queue_capacity);
        let drain = CancellationToken::new();
        let connected = link.is_some();

        let worker = DeliveryWorker::new(
            &config,
            connector,
            link,
            rx,
            Arc::clone(&shared),
            drain.clone(),
        );

        shared.accepting.store(true, Ordering::Release);
        shared.transition(if connected {
            TransportState::Ready
        } else {
            TransportState::Degraded
        });

        let handle = tokio::spawn(worker.run());
        info!(
            "Sink transport opened to {} (queue capacity {})",
            target, config.queue_capacity
        );

        Ok(Self {
            config,
            target,
            shared,
            queue,
            drain,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Serializes `message` and queues it for delivery without blocking.
    pub fn enqueue(&self, message: &WireMessage) -> Result<(), TransportError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let payload = message.to_gelf_json()?;
        self.enqueue_payload(payload)
    }

    /// Queues an already serialized GELF document.
    pub fn enqueue_payload(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        // Counted before the send so the worker can never settle first.
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        match self.queue.try_send(QueuedSend::new(payload)) {
            Ok(()) => {
                self.shared.metrics.increment(MetricKind::Enqueued);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.settle();
                self.shared.metrics.increment(MetricKind::QueueFull);
                Err(TransportError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.settle();
                Err(TransportError::Closed)
            }
        }
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.shared.state.subscribe()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Messages accepted but not yet taken by the worker.
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Messages accepted but not yet sent or dropped, including the one
    /// being sent and any waiting for a retry.
    pub fn pending(&self) -> usize {
        self.shared.outstanding()
    }

    pub fn stats(&self) -> TransportStats {
        let snapshot = self.shared.metrics.snapshot();
        TransportStats {
            state: self.state(),
            queued: self.queued(),
            pending: self.pending(),
            enqueued: snapshot.enqueued,
            sent: snapshot.sent,
            retried: snapshot.retried,
            dropped: snapshot.dropped_send_failed,
            queue_full: snapshot.queue_full,
            reconnects: snapshot.reconnects,
            degraded_transitions: snapshot.degraded_transitions,
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Stops accepting, drains pending messages within the flush grace, then
    /// aborts whatever is left. Safe to call more than once.
    pub async fn close(&self) {
        let mut worker = self.worker.lock().await;
        let Some(mut handle) = worker.take() else {
            return;
        };

        self.shared.accepting.store(false, Ordering::Release);
        self.shared.transition(TransportState::Draining);
        info!(
            "Closing sink transport, draining {} pending messages",
            self.pending()
        );
        self.drain.cancel();

        let drained = tokio::time::timeout(self.config.flush_grace, &mut handle).await;
        match drained {
            Ok(Ok(())) => info!("Sink transport drained"),
            Ok(Err(e)) => warn!("Delivery worker ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Flush grace of {:?} expired, aborting delivery worker",
                    self.config.flush_grace
                );
                handle.abort();
                // The worker must be gone before its leftovers are counted.
                let _ = handle.await;
            }
        }

        let abandoned = self.shared.take_outstanding();
        if abandoned > 0 {
            warn!("Abandoning {} undelivered messages", abandoned);
            self.shared
                .metrics
                .add(MetricKind::DroppedSendFailed, abandoned as u64);
        }

        self.shared.transition(TransportState::Closed);
    }
}
