use super::config::{TransportConfig, TransportMode};
use super::framing::FrameEncoder;
use super::link::{self, Connector, SinkLink};
use super::{QueuedSend, Shared, TransportError, TransportState};
use crate::reliability::{MetricKind, RetryPolicy};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Datagram sends that failed, waiting for their backoff to elapse.
struct RetrySlot {
    item: QueuedSend,
    ready_at: Instant,
}

/// Sole owner of the sink link. Pulls from the queue and delivers in order,
/// except that failed UDP sends are requeued at the tail.
pub(crate) struct DeliveryWorker {
    rx: mpsc::Receiver<QueuedSend>,
    connector: Arc<dyn Connector>,
    link: Option<Box<dyn SinkLink>>,
    encoder: FrameEncoder,
    retry: RetryPolicy,
    mode: TransportMode,
    connect_timeout: Duration,
    send_timeout: Duration,
    reconnect_delay: Duration,
    retry_limit: usize,
    retry_queue: VecDeque<RetrySlot>,
    shared: Arc<Shared>,
    drain: CancellationToken,
}

impl DeliveryWorker {
    pub(crate) fn new(
        config: &TransportConfig,
        connector: Arc<dyn Connector>,
        link: Option<Box<dyn SinkLink>>,
        rx: mpsc::Receiver<QueuedSend>,
        shared: Arc<Shared>,
        drain: CancellationToken,
    ) -> Self {
        Self {
            rx,
            connector,
            link,
            encoder: FrameEncoder::new(config.mode, config.compression, config.udp_chunk_size),
            retry: config.retry.clone(),
            mode: config.mode,
            connect_timeout: config.connect_timeout,
            send_timeout: config.send_timeout,
            reconnect_delay: config.reconnect_delay,
            retry_limit: config.queue_capacity,
            retry_queue: VecDeque::new(),
            shared,
            drain,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Delivery worker started for {}", self.connector.target());

        loop {
            let next_retry = self.next_retry_at();
            let idle_degraded = self.link.is_none();

            tokio::select! {
                biased;

                _ = self.drain.cancelled() => break,

                _ = sleep_until(next_retry.unwrap_or_else(Instant::now)), if next_retry.is_some() => {
                    if let Some(item) = self.take_due_retry() {
                        self.deliver(item).await;
                    }
                }

                item = self.rx.recv() => match item {
                    Some(item) => self.deliver(item).await,
                    None => {
                        debug!("All transport handles dropped, stopping worker");
                        break;
                    }
                },

                _ = sleep(self.reconnect_delay), if idle_degraded => {
                    self.reconnect().await;
                }
            }
        }

        self.drain_pending().await;
        self.link = None;
        self.shared.transition(TransportState::Closed);
        debug!("Delivery worker stopped");
    }

    /// Delivers whatever is still pending, retrying inline.
    async fn drain_pending(&mut self) {
        self.rx.close();

        let retries: Vec<QueuedSend> = self.retry_queue.drain(..).map(|slot| slot.item).collect();
        let mut flushed = 0usize;
        for item in retries {
            self.deliver_inline(item).await;
            flushed += 1;
        }
        while let Some(item) = self.rx.recv().await {
            self.deliver_inline(item).await;
            flushed += 1;
        }

        if flushed > 0 {
            info!("Flushed {} pending messages while draining", flushed);
        }
    }

    async fn deliver(&mut self, item: QueuedSend) {
        match self.mode {
            TransportMode::Tcp => self.deliver_inline(item).await,
            TransportMode::Udp => self.deliver_requeue(item).await,
        }
    }

    /// One attempt; on failure the message goes to the back of the line.
    async fn deliver_requeue(&mut self, mut item: QueuedSend) {
        let Some(frames) = self.frames_for(&item) else {
            return;
        };

        match self.attempt(&frames).await {
            Ok(()) => self.record_sent(&item),
            Err(e) => {
                item.attempts += 1;
                if self.give_up(&item, &e) {
                    return;
                }
                if self.retry_queue.len() >= self.retry_limit {
                    warn!(
                        "Retry queue full ({} entries), dropping message after {} attempts",
                        self.retry_limit, item.attempts
                    );
                    self.drop_message();
                    return;
                }

                let delay = self.retry.calculate_delay(item.attempts - 1);
                debug!(
                    "Send attempt {} failed ({}), retrying in {:?}",
                    item.attempts, e, delay
                );
                self.shared.metrics().increment(MetricKind::Retried);
                self.retry_queue.push_back(RetrySlot {
                    item,
                    ready_at: Instant::now() + delay,
                });
            }
        }
    }

    /// Retries in place so later messages never overtake this one.
    async fn deliver_inline(&mut self, mut item: QueuedSend) {
        let Some(frames) = self.frames_for(&item) else {
            return;
        };

        loop {
            match self.attempt(&frames).await {
                Ok(()) => {
                    self.record_sent(&item);
                    return;
                }
                Err(e) => {
                    item.attempts += 1;
                    if self.give_up(&item, &e) {
                        return;
                    }
                    let delay = self.retry.calculate_delay(item.attempts - 1);
                    debug!(
                        "Send attempt {} failed ({}), retrying in {:?}",
                        item.attempts, e, delay
                    );
                    self.shared.metrics().increment(MetricKind::Retried);
                    sleep(delay).await;
                }
            }
        }
    }

    fn frames_for(&self, item: &QueuedSend) -> Option<Vec<Bytes>> {
        match self.encoder.encode(&item.payload) {
            Ok(frames) => Some(frames),
            Err(e) => {
                error!("Dropping unframeable message: {}", e);
                self.drop_message();
                None
            }
        }
    }

    /// Records the failure and reports whether the message was dropped.
    fn give_up(&self, item: &QueuedSend, cause: &TransportError) -> bool {
        self.shared.metrics().increment(MetricKind::SendFailures);
        if !self.retry.should_give_up(item.attempts) {
            return false;
        }
        error!(
            "Dropping message after {} failed attempts ({:?} since enqueue): {}",
            item.attempts,
            item.enqueued_at.elapsed(),
            cause
        );
        self.drop_message();
        true
    }

    fn drop_message(&self) {
        self.shared.metrics().increment(MetricKind::DroppedSendFailed);
        self.shared.settle();
    }

    fn record_sent(&self, item: &QueuedSend) {
        self.shared.metrics().increment(MetricKind::Sent);
        self.shared.settle();
        if item.attempts > 0 {
            debug!("Message delivered after {} retries", item.attempts);
        }
    }

    /// A single send, connecting first if there is no link.
    async fn attempt(&mut self, frames: &[Bytes]) -> Result<(), TransportError> {
        if self.link.is_none() && !self.reconnect().await {
            return Err(TransportError::SendFailed("sink unreachable".to_string()));
        }
        let Some(link) = self.link.as_mut() else {
            return Err(TransportError::SendFailed("no link".to_string()));
        };

        let result = match timeout(self.send_timeout, link.send(frames)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::SendFailed(format!(
                "send timed out after {:?}",
                self.send_timeout
            ))),
        };

        if result.is_err() {
            self.link = None;
            self.shared.transition(TransportState::Degraded);
        }
        result
    }

    async fn reconnect(&mut self) -> bool {
        match link::connect_with_timeout(self.connector.as_ref(), self.connect_timeout).await {
            Ok(link) => {
                self.link = Some(link);
                self.shared.metrics().increment(MetricKind::Reconnects);
                self.shared.transition(TransportState::Ready);
                true
            }
            Err(e) => {
                debug!("Reconnect to {} failed: {}", self.connector.target(), e);
                self.shared.transition(TransportState::Degraded);
                false
            }
        }
    }

    fn next_retry_at(&self) -> Option<Instant> {
        self.retry_queue.iter().map(|slot| slot.ready_at).min()
    }

    fn take_due_retry(&mut self) -> Option<QueuedSend> {
        let now = Instant::now();
        let index = self
            .retry_queue
            .iter()
            .position(|slot| slot.ready_at <= now)?;
        self.retry_queue.remove(index).map(|slot| slot.item)
    }
}
