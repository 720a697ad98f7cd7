//! Pipeline lifecycle: open the transport, start consumers, watch transport
//! health, and shut everything down in order.

pub mod alert;
mod monitor;

pub use alert::{AlertReason, AlertSink, DegradedAlert, LogAlertSink};

use crate::codec::{CodecConfig, EventCodec};
use crate::consumer::{ConsumerConfig, ConsumerReport, ForwardingConsumer};
use crate::reliability::{
    ComponentHealth, HealthConfig, HealthHandle, HealthMonitor, HealthReport, MetricKind,
    MetricsSnapshot, PipelineMetrics,
};
use crate::stream::{StreamError, StreamSource};
use crate::transport::{Connector, SinkTransport, TransportConfig, TransportError, TransportStats};
use monitor::{StateMonitor, TRANSPORT_COMPONENT};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONSUMERS_COMPONENT: &str = "consumers";

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("Pipeline already started")]
    AlreadyStarted,
    #[error("Pipeline not started")]
    NotStarted,
    #[error("Invalid supervisor configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub transport: TransportConfig,
    pub consumer: ConsumerConfig,
    pub codec: CodecConfig,
    pub consumer_workers: usize,
    pub degraded_alert_after: Duration,
    pub degraded_alert_threshold: u32,
    pub consumer_stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            consumer: ConsumerConfig::default(),
            codec: CodecConfig::default(),
            consumer_workers: 1,
            degraded_alert_after: Duration::from_secs(30),
            degraded_alert_threshold: 3,
            consumer_stop_timeout: Duration::from_secs(5),
        }
    }
}

/// What the pipeline did over its lifetime.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub consumers: Vec<ConsumerReport>,
    /// Consumers that had to be aborted after the stop timeout.
    pub aborted_consumers: usize,
    pub transport: TransportStats,
    pub metrics: MetricsSnapshot,
    pub uptime: Duration,
}

struct Running {
    transport: Arc<SinkTransport>,
    consumers: Vec<JoinHandle<ConsumerReport>>,
    consumer_cancel: CancellationToken,
    monitor: JoinHandle<()>,
    monitor_cancel: CancellationToken,
}

pub struct PipelineSupervisor {
    config: SupervisorConfig,
    metrics: Arc<PipelineMetrics>,
    health: Arc<HealthMonitor>,
    alerts: Arc<dyn AlertSink>,
    connector: Option<Arc<dyn Connector>>,
    start_time: Instant,
    ready: Arc<AtomicBool>,
    running: Option<Running>,
}

impl PipelineSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(PipelineMetrics::new()),
            health: Arc::new(HealthMonitor::new(HealthConfig::default())),
            alerts: Arc::new(LogAlertSink),
            connector: None,
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Uses `connector` instead of resolving the configured sink address.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn transport(&self) -> Option<&Arc<SinkTransport>> {
        self.running.as_ref().map(|r| &r.transport)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub async fn health_report(&self) -> HealthReport {
        HealthReport::generate(&self.health, self.start_time).await
    }

    /// Readiness and health for serving outside the supervisor.
    pub fn health_handle(&self) -> HealthHandle {
        HealthHandle::new(
            Arc::clone(&self.health),
            Arc::clone(&self.ready),
            self.start_time,
        )
    }

    /// Opens the transport, then subscribes and spawns one consumer per
    /// worker. `make_source(index, count)` builds each group member.
    pub async fn start<S, F>(&mut self, mut make_source: F) -> Result<(), SupervisorError>
    where
        S: StreamSource + 'static,
        F: FnMut(usize, usize) -> S,
    {
        if self.running.is_some() {
            return Err(SupervisorError::AlreadyStarted);
        }
        if self.config.consumer_workers == 0 {
            return Err(SupervisorError::InvalidConfig(
                "consumer_workers must be greater than 0".to_string(),
            ));
        }

        let degraded_baseline = self.metrics.get(MetricKind::DegradedTransitions);
        let transport_config = self.config.transport.clone();
        let transport = match &self.connector {
            Some(connector) => {
                SinkTransport::open_with_connector(
                    transport_config,
                    Arc::clone(connector),
                    Arc::clone(&self.metrics),
                )
                .await
            }
            None => SinkTransport::open(transport_config, Arc::clone(&self.metrics)).await,
        };
        let transport = match transport {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                error!("Failed to open sink transport: {}", e);
                self.health
                    .update_component_health(
                        TRANSPORT_COMPONENT,
                        ComponentHealth::Unhealthy(e.to_string()),
                    )
                    .await;
                return Err(e.into());
            }
        };

        let workers = self.config.consumer_workers;
        let consumer_config = &self.config.consumer;
        let mut sources = Vec::with_capacity(workers);
        for index in 0..workers {
            let mut source = make_source(index, workers);
            if let Err(e) = source
                .subscribe(&consumer_config.topic, &consumer_config.consumer_group)
                .await
            {
                error!("Consumer {} failed to subscribe: {}", index, e);
                for mut subscribed in sources {
                    StreamSource::close(&mut subscribed).await;
                }
                transport.close().await;
                return Err(e.into());
            }
            sources.push(source);
        }

        let codec = Arc::new(EventCodec::new(self.config.codec.clone()));
        let consumer_cancel = CancellationToken::new();
        let consumers = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let consumer = ForwardingConsumer::new(
                    index,
                    source,
                    Arc::clone(&codec),
                    Arc::clone(&transport),
                    Arc::clone(&self.metrics),
                    self.config.consumer.clone(),
                );
                tokio::spawn(consumer.run(consumer_cancel.child_token()))
            })
            .collect();

        let monitor_cancel = CancellationToken::new();
        let monitor = StateMonitor {
            target: transport.target().to_string(),
            states: transport.subscribe_state(),
            health: Arc::clone(&self.health),
            alerts: Arc::clone(&self.alerts),
            metrics: Arc::clone(&self.metrics),
            alert_after: self.config.degraded_alert_after,
            alert_threshold: self.config.degraded_alert_threshold,
            degraded_baseline,
            cancel: monitor_cancel.clone(),
        };
        let monitor = tokio::spawn(monitor.run());

        self.health
            .update_component_health(CONSUMERS_COMPONENT, ComponentHealth::Healthy)
            .await;
        self.ready.store(true, Ordering::Release);
        info!(
            "Pipeline started: {} consumer(s) on '{}' forwarding to {}",
            workers,
            self.config.consumer.topic,
            transport.target()
        );

        self.running = Some(Running {
            transport,
            consumers,
            consumer_cancel,
            monitor,
            monitor_cancel,
        });
        Ok(())
    }

    /// Stops consumers first, then drains and closes the transport.
    pub async fn shutdown(&mut self) -> Result<PipelineReport, SupervisorError> {
        let running = self.running.take().ok_or(SupervisorError::NotStarted)?;
        self.ready.store(false, Ordering::Release);
        info!("Shutting down pipeline");

        running.consumer_cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.config.consumer_stop_timeout;
        let mut consumers = Vec::with_capacity(running.consumers.len());
        let mut aborted = 0usize;
        for mut handle in running.consumers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(report)) => consumers.push(report),
                Ok(Err(e)) => {
                    error!("Consumer task failed: {}", e);
                    aborted += 1;
                }
                Err(_) => {
                    warn!(
                        "Consumer did not stop within {:?}, aborting",
                        self.config.consumer_stop_timeout
                    );
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        self.health
            .update_component_health(
                CONSUMERS_COMPONENT,
                ComponentHealth::Unhealthy("stopped".to_string()),
            )
            .await;

        running.transport.close().await;

        running.monitor_cancel.cancel();
        if let Err(e) = running.monitor.await {
            warn!("State monitor ended abnormally: {}", e);
        }

        let report = PipelineReport {
            consumers,
            aborted_consumers: aborted,
            transport: running.transport.stats(),
            metrics: self.metrics.snapshot(),
            uptime: self.start_time.elapsed(),
        };
        info!(
            "Pipeline stopped: sent={} dropped={} decode_failed={} committed={}",
            report.metrics.sent,
            report.metrics.dropped(),
            report.metrics.decode_failed,
            report.metrics.committed
        );
        Ok(report)
    }
}
