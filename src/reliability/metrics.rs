// Lock-free pipeline counters, optionally mirrored into a Prometheus registry.
#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("HTTP server error: {0}")]
    HttpError(String),
}

/// Every counted pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Raw messages pulled off the stream.
    Received,
    Decoded,
    DecodeFailed,
    /// Messages accepted by the transport queue.
    Enqueued,
    /// Enqueue attempts rejected because the queue was saturated.
    QueueFull,
    QueueFullRetries,
    /// Messages given up on after the enqueue retry budget.
    DroppedQueueFull,
    Committed,
    CommitFailed,
    StreamErrors,
    /// Payloads written to the sink.
    Sent,
    SendFailures,
    Retried,
    /// Payloads dropped after exhausting send attempts or abandoned at close.
    DroppedSendFailed,
    Reconnects,
    DegradedTransitions,
    Alerts,
}

impl MetricKind {
    pub const COUNT: usize = 17;

    pub const ALL: [MetricKind; Self::COUNT] = [
        MetricKind::Received,
        MetricKind::Decoded,
        MetricKind::DecodeFailed,
        MetricKind::Enqueued,
        MetricKind::QueueFull,
        MetricKind::QueueFullRetries,
        MetricKind::DroppedQueueFull,
        MetricKind::Committed,
        MetricKind::CommitFailed,
        MetricKind::StreamErrors,
        MetricKind::Sent,
        MetricKind::SendFailures,
        MetricKind::Retried,
        MetricKind::DroppedSendFailed,
        MetricKind::Reconnects,
        MetricKind::DegradedTransitions,
        MetricKind::Alerts,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricKind::Received => "received",
            MetricKind::Decoded => "decoded",
            MetricKind::DecodeFailed => "decode_failed",
            MetricKind::Enqueued => "enqueued",
            MetricKind::QueueFull => "queue_full",
            MetricKind::QueueFullRetries => "queue_full_retries",
            MetricKind::DroppedQueueFull => "dropped_queue_full",
            MetricKind::Committed => "committed",
            MetricKind::CommitFailed => "commit_failed",
            MetricKind::StreamErrors => "stream_errors",
            MetricKind::Sent => "sent",
            MetricKind::SendFailures => "send_failures",
            MetricKind::Retried => "retried",
            MetricKind::DroppedSendFailed => "dropped_send_failed",
            MetricKind::Reconnects => "reconnects",
            MetricKind::DegradedTransitions => "degraded_transitions",
            MetricKind::Alerts => "alerts",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub decoded: u64,
    pub decode_failed: u64,
    pub enqueued: u64,
    pub queue_full: u64,
    pub queue_full_retries: u64,
    pub dropped_queue_full: u64,
    pub committed: u64,
    pub commit_failed: u64,
    pub stream_errors: u64,
    pub sent: u64,
    pub send_failures: u64,
    pub retried: u64,
    pub dropped_send_failed: u64,
    pub reconnects: u64,
    pub degraded_transitions: u64,
    pub alerts: u64,
}

impl MetricsSnapshot {
    /// Total messages dropped for any reason after decoding.
    pub fn dropped(&self) -> u64 {
        self.dropped_queue_full + self.dropped_send_failed
    }
}

#[cfg(feature = "metrics")]
struct PrometheusMirror {
    registry: Registry,
    events: IntCounterVec,
    transport_state: IntGauge,
}

#[cfg(feature = "metrics")]
impl PrometheusMirror {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events = IntCounterVec::new(
            Opts::new("rask_relay_events_total", "Pipeline events by kind"),
            &["event"],
        )?;
        registry.register(Box::new(events.clone()))?;

        let transport_state = IntGauge::new(
            "rask_relay_transport_state",
            "Sink transport state (0=uninitialized .. 5=closed)",
        )?;
        registry.register(Box::new(transport_state.clone()))?;

        Ok(Self {
            registry,
            events,
            transport_state,
        })
    }
}

/// Shared counters for the consumer, the transport and the supervisor.
pub struct PipelineMetrics {
    counters: [AtomicU64; MetricKind::COUNT],
    #[cfg(feature = "metrics")]
    prometheus: Option<PrometheusMirror>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        #[cfg(feature = "metrics")]
        let prometheus = match PrometheusMirror::new() {
            Ok(mirror) => Some(mirror),
            Err(e) => {
                tracing::warn!("Prometheus registry unavailable, counters only: {}", e);
                None
            }
        };

        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            #[cfg(feature = "metrics")]
            prometheus,
        }
    }

    pub fn increment(&self, kind: MetricKind) {
        self.add(kind, 1);
    }

    pub fn add(&self, kind: MetricKind, value: u64) {
        self.counters[kind.index()].fetch_add(value, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        {
            if let Some(mirror) = &self.prometheus {
                mirror
                    .events
                    .with_label_values(&[kind.label()])
                    .inc_by(value);
            }
        }
    }

    pub fn get(&self, kind: MetricKind) -> u64 {
        self.counters[kind.index()].load(Ordering::Relaxed)
    }

    pub fn set_transport_state(&self, code: i64) {
        #[cfg(feature = "metrics")]
        {
            if let Some(mirror) = &self.prometheus {
                mirror.transport_state.set(code);
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = code;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.get(MetricKind::Received),
            decoded: self.get(MetricKind::Decoded),
            decode_failed: self.get(MetricKind::DecodeFailed),
            enqueued: self.get(MetricKind::Enqueued),
            queue_full: self.get(MetricKind::QueueFull),
            queue_full_retries: self.get(MetricKind::QueueFullRetries),
            dropped_queue_full: self.get(MetricKind::DroppedQueueFull),
            committed: self.get(MetricKind::Committed),
            commit_failed: self.get(MetricKind::CommitFailed),
            stream_errors: self.get(MetricKind::StreamErrors),
            sent: self.get(MetricKind::Sent),
            send_failures: self.get(MetricKind::SendFailures),
            retried: self.get(MetricKind::Retried),
            dropped_send_failed: self.get(MetricKind::DroppedSendFailed),
            reconnects: self.get(MetricKind::Reconnects),
            degraded_transitions: self.get(MetricKind::DegradedTransitions),
            alerts: self.get(MetricKind::Alerts),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn export_text(&self) -> Result<String, MetricsError> {
        let Some(mirror) = &self.prometheus else {
            return Ok("# Metrics registry unavailable\n".to_string());
        };
        let encoder = TextEncoder::new();
        let metric_families = mirror.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    #[cfg(not(feature = "metrics"))]
    pub fn export_text(&self) -> Result<String, MetricsError> {
        Ok("# Metrics disabled\n".to_string())
    }
}

/// `/metrics` in Prometheus text format and `/health` as the JSON health
/// report, answered with 503 while the pipeline is not serving.
#[cfg(feature = "metrics")]
pub fn routes(
    metrics: std::sync::Arc<PipelineMetrics>,
    health: super::HealthHandle,
) -> impl warp::Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    use warp::http::StatusCode;
    use warp::{Filter, Reply};

    let metrics_route = warp::path!("metrics")
        .and(warp::get())
        .map(move || match metrics.export_text() {
            Ok(metrics_text) => warp::reply::with_header(
                metrics_text,
                "content-type",
                "text/plain; version=0.0.4",
            )
            .into_response(),
            Err(_) => {
                warp::reply::with_status("Internal Server Error", StatusCode::INTERNAL_SERVER_ERROR)
                    .into_response()
            }
        });

    let health_route = warp::path!("health").and(warp::get()).then(move || {
        let health = health.clone();
        async move {
            let (serving, report) = health.is_serving().await;
            let status = if serving {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            warp::reply::with_status(warp::reply::json(&report), status)
        }
    });

    metrics_route.or(health_route)
}

/// Serves [`routes`] until `shutdown` resolves.
#[cfg(feature = "metrics")]
pub async fn serve_metrics<F>(
    metrics: std::sync::Arc<PipelineMetrics>,
    health: super::HealthHandle,
    port: u16,
    shutdown: F,
) -> Result<(), MetricsError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let (addr, server) = warp::serve(routes(metrics, health))
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), shutdown)
        .map_err(|e| MetricsError::HttpError(e.to_string()))?;

    tracing::info!("Serving Prometheus metrics on {}", addr);
    server.await;
    Ok(())
}

#[cfg(not(feature = "metrics"))]
pub async fn serve_metrics<F>(
    _metrics: std::sync::Arc<PipelineMetrics>,
    _health: super::HealthHandle,
    _port: u16,
    _shutdown: F,
) -> Result<(), MetricsError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tracing::warn!("Metrics feature is disabled");
    Ok(())
}
