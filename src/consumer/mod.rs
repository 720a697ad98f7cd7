//! Stream → decode → encode → enqueue → commit.
//!
//! A message is committed once it is either in the transport queue or has been
//! deliberately skipped (undecodable, or dropped after the enqueue retry
//! budget). When the transport reports `Closed` the in-flight message is left
//! uncommitted so the stream redelivers it.

use crate::codec::{EventCodec, WireMessage};
use crate::domain::MessageContext;
use crate::reliability::{MetricKind, PipelineMetrics};
use crate::stream::{StreamError, StreamMessage, StreamSource};
use crate::transport::{SinkTransport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub consumer_group: String,
    pub poll_batch_size: usize,
    pub poll_timeout: Duration,
    /// Extra enqueue attempts after the first `QueueFull`.
    pub enqueue_retry_budget: u32,
    pub enqueue_retry_delay: Duration,
    pub poll_error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "logs".to_string(),
            consumer_group: "log-consumers".to_string(),
            poll_batch_size: 100,
            poll_timeout: Duration::from_millis(500),
            enqueue_retry_budget: 5,
            enqueue_retry_delay: Duration::from_millis(50),
            poll_error_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TransportClosed,
    SourceClosed,
}

/// Per-consumer counters returned when `run` finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub worker_id: usize,
    pub received: u64,
    pub decoded: u64,
    pub decode_failed: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub committed: u64,
    pub commit_failed: u64,
    pub poll_errors: u64,
    pub stop_reason: StopReason,
}

impl ConsumerReport {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            received: 0,
            decoded: 0,
            decode_failed: 0,
            forwarded: 0,
            dropped: 0,
            committed: 0,
            commit_failed: 0,
            poll_errors: 0,
            stop_reason: StopReason::Cancelled,
        }
    }
}

enum EnqueueOutcome {
    Enqueued,
    /// Retry budget exhausted or message unsendable; commit and move on.
    Dropped,
    /// Transport is closing; leave the message uncommitted.
    Closed,
    /// Cancelled while waiting for queue space; leave it uncommitted.
    Interrupted,
}

enum Flow {
    Continue,
    Stop(StopReason),
}

pub struct ForwardingConsumer<S> {
    worker_id: usize,
    source: S,
    codec: Arc<EventCodec>,
    transport: Arc<SinkTransport>,
    metrics: Arc<PipelineMetrics>,
    config: ConsumerConfig,
}

impl<S: StreamSource> ForwardingConsumer<S> {
    /// `source` must already be subscribed.
    pub fn new(
        worker_id: usize,
        source: S,
        codec: Arc<EventCodec>,
        transport: Arc<SinkTransport>,
        metrics: Arc<PipelineMetrics>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            worker_id,
            source,
            codec,
            transport,
            metrics,
            config,
        }
    }

    /// Forwards messages until cancelled, the transport closes, or the source
    /// goes away.
    pub async fn run(mut self, cancel: CancellationToken) -> ConsumerReport {
        let mut report = ConsumerReport::new(self.worker_id);
        info!(
            "Consumer {} forwarding '{}' as group '{}'",
            self.worker_id, self.config.topic, self.config.consumer_group
        );

        report.stop_reason = loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                polled = self
                    .source
                    .poll(self.config.poll_batch_size, self.config.poll_timeout) => Some(polled),
            };
            let Some(polled) = polled else {
                break StopReason::Cancelled;
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(StreamError::Closed) => break StopReason::SourceClosed,
                Err(e) => {
                    report.poll_errors += 1;
                    self.metrics.increment(MetricKind::StreamErrors);
                    warn!(
                        "Consumer {} poll failed, backing off {:?}: {}",
                        self.worker_id, self.config.poll_error_backoff, e
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break StopReason::Cancelled,
                        () = tokio::time::sleep(self.config.poll_error_backoff) => continue,
                    }
                }
            };

            if let Flow::Stop(reason) = self.forward_batch(batch, &cancel, &mut report).await {
                break reason;
            }
        };

        self.source.close().await;
        info!(
            "Consumer {} stopped ({:?}): received={} forwarded={} decode_failed={} dropped={} committed={}",
            self.worker_id,
            report.stop_reason,
            report.received,
            report.forwarded,
            report.decode_failed,
            report.dropped,
            report.committed
        );
        report
    }

    async fn forward_batch(
        &mut self,
        batch: Vec<StreamMessage>,
        cancel: &CancellationToken,
        report: &mut ConsumerReport,
    ) -> Flow {
        for message in batch {
            if cancel.is_cancelled() {
                return Flow::Stop(StopReason::Cancelled);
            }
            if let Flow::Stop(reason) = self.forward(message, cancel, report).await {
                return Flow::Stop(reason);
            }
        }
        Flow::Continue
    }

    async fn forward(
        &mut self,
        message: StreamMessage,
        cancel: &CancellationToken,
        report: &mut ConsumerReport,
    ) -> Flow {
        report.received += 1;
        self.metrics.increment(MetricKind::Received);
        let ctx = message.context(&self.config.consumer_group);

        let event = match self.codec.decode(&message.payload, &ctx) {
            Ok(event) => event,
            Err(e) => {
                report.decode_failed += 1;
                self.metrics.increment(MetricKind::DecodeFailed);
                warn!(
                    topic = %ctx.topic,
                    partition = ctx.partition,
                    offset = ctx.offset,
                    "Skipping undecodable message: {}",
                    e
                );
                self.commit(&message, report).await;
                return Flow::Continue;
            }
        };
        report.decoded += 1;
        self.metrics.increment(MetricKind::Decoded);

        let wire = self.codec.encode(&event, &message.payload);
        match enqueue_with_budget(&self.transport, &self.metrics, &self.config, &wire, &ctx, cancel)
            .await
        {
            EnqueueOutcome::Enqueued => {
                report.forwarded += 1;
                self.commit(&message, report).await;
                Flow::Continue
            }
            EnqueueOutcome::Dropped => {
                report.dropped += 1;
                self.commit(&message, report).await;
                Flow::Continue
            }
            EnqueueOutcome::Closed => {
                info!(
                    topic = %ctx.topic,
                    partition = ctx.partition,
                    offset = ctx.offset,
                    "Transport closed, leaving message for redelivery"
                );
                Flow::Stop(StopReason::TransportClosed)
            }
            EnqueueOutcome::Interrupted => Flow::Stop(StopReason::Cancelled),
        }
    }

    async fn commit(&mut self, message: &StreamMessage, report: &mut ConsumerReport) {
        let cursor = message.cursor();
        match self.source.commit(&cursor).await {
            Ok(()) => {
                report.committed += 1;
                self.metrics.increment(MetricKind::Committed);
            }
            Err(e) => {
                report.commit_failed += 1;
                self.metrics.increment(MetricKind::CommitFailed);
                warn!("Commit of {} failed: {}", cursor, e);
            }
        }
    }
}

/// Enqueues with bounded retries while the queue is saturated.
async fn enqueue_with_budget(
    transport: &SinkTransport,
    metrics: &PipelineMetrics,
    config: &ConsumerConfig,
    wire: &WireMessage,
    ctx: &MessageContext,
    cancel: &CancellationToken,
) -> EnqueueOutcome {
    let mut retries = 0u32;
    loop {
        match transport.enqueue(wire) {
            Ok(()) => return EnqueueOutcome::Enqueued,
            Err(TransportError::QueueFull) => {
                if retries >= config.enqueue_retry_budget {
                    metrics.increment(MetricKind::DroppedQueueFull);
                    warn!(
                        topic = %ctx.topic,
                        partition = ctx.partition,
                        offset = ctx.offset,
                        "Send queue still full after {} retries, dropping message",
                        retries
                    );
                    return EnqueueOutcome::Dropped;
                }
                retries += 1;
                metrics.increment(MetricKind::QueueFullRetries);
                debug!(
                    offset = ctx.offset,
                    "Send queue full, retry {}/{}", retries, config.enqueue_retry_budget
                );
                tokio::select! {
                    () = cancel.cancelled() => return EnqueueOutcome::Interrupted,
                    () = tokio::time::sleep(config.enqueue_retry_delay) => {}
                }
            }
            Err(TransportError::Closed) => return EnqueueOutcome::Closed,
            Err(e) => {
                metrics.increment(MetricKind::DroppedSendFailed);
                error!(
                    topic = %ctx.topic,
                    partition = ctx.partition,
                    offset = ctx.offset,
                    "Message cannot be queued, dropping: {}",
                    e
                );
                return EnqueueOutcome::Dropped;
            }
        }
    }
}
