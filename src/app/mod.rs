pub mod config;
pub mod logging_system;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging_safe};
pub use shutdown::SignalHandler;

use crate::domain::RelayError;
use crate::reliability::{PipelineMetrics, serve_metrics};
use crate::stream::MemoryBroker;
use crate::supervisor::{PipelineReport, PipelineSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const STDIN_DRAIN_POLL: Duration = Duration::from_millis(100);

pub struct App {
    config: Config,
    instance_id: Uuid,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::load(args)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs until SIGINT/SIGTERM.
    pub async fn run(self) -> Result<PipelineReport, RelayError> {
        let shutdown = CancellationToken::new();
        let _signals = SignalHandler::install(shutdown.clone());
        self.run_until(shutdown).await
    }

    /// Runs until `shutdown` is cancelled. In stdin mode the pipeline also
    /// stops by itself once input is exhausted and fully forwarded.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<PipelineReport, RelayError> {
        info!(
            "Starting rask-log-relay v{} (instance {})",
            crate::VERSION,
            self.instance_id
        );
        info!(
            "Configuration: sink={}://{}:{}, topic={}, group={}, workers={}",
            self.config.transport,
            self.config.sink_host,
            self.config.sink_port,
            self.config.topic,
            self.config.consumer_group,
            self.config.consumer_workers
        );

        let metrics = Arc::new(PipelineMetrics::new());
        let mut supervisor =
            PipelineSupervisor::new(self.config.supervisor_config()).with_metrics(Arc::clone(&metrics));

        if self.config.stdin {
            self.start_stdin(&mut supervisor, &shutdown).await?;
        } else {
            self.start_broker(&mut supervisor).await?;
        }

        if self.config.enable_metrics {
            let port = self.config.metrics_port;
            let stop = shutdown.clone().cancelled_owned();
            let metrics = Arc::clone(&metrics);
            let health = supervisor.health_handle();
            tokio::spawn(async move {
                if let Err(e) = serve_metrics(metrics, health, port, stop).await {
                    warn!("Metrics server failed: {}", e);
                }
            });
        }

        info!("rask-log-relay is running. Press Ctrl+C to stop.");
        shutdown.cancelled().await;

        let report = supervisor.shutdown().await?;
        info!(
            "rask-log-relay stopped after {:?}: received={} sent={} dropped={}",
            report.uptime,
            report.metrics.received,
            report.metrics.sent,
            report.metrics.dropped()
        );
        Ok(report)
    }

    async fn start_stdin(
        &self,
        supervisor: &mut PipelineSupervisor,
        shutdown: &CancellationToken,
    ) -> Result<(), RelayError> {
        let broker = MemoryBroker::new();
        broker.create_topic(&self.config.topic, self.config.consumer_workers);

        let subscribers = broker.clone();
        supervisor
            .start(move |index, count| subscribers.subscriber(index, count))
            .await?;

        tokio::spawn(pump_stdin(
            broker,
            self.config.topic.clone(),
            self.config.consumer_group.clone(),
            shutdown.clone(),
        ));
        info!("Reading newline-delimited JSON from stdin");
        Ok(())
    }

    #[cfg(feature = "kafka")]
    async fn start_broker(&self, supervisor: &mut PipelineSupervisor) -> Result<(), RelayError> {
        use crate::stream::KafkaSource;

        let brokers = self.config.brokers.clone();
        supervisor
            .start(move |_, _| KafkaSource::new(brokers.clone()))
            .await?;
        Ok(())
    }

    #[cfg(not(feature = "kafka"))]
    async fn start_broker(&self, _supervisor: &mut PipelineSupervisor) -> Result<(), RelayError> {
        Err(ConfigError::InvalidConfig(
            "No stream source available: pass --stdin or build with the `kafka` feature".to_string(),
        )
        .into())
    }
}

/// Publishes stdin lines into the in-memory topic. After EOF, waits for the
/// group to commit everything and then triggers shutdown.
async fn pump_stdin(broker: MemoryBroker, topic: String, group: String, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut published = 0u64;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        broker.publish(&topic, None, line.to_string());
                        published += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    }

    info!("stdin closed after {} lines, waiting for forwarding to finish", published);
    while broker.lag(&topic, &group) > 0 {
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(STDIN_DRAIN_POLL) => {}
        }
    }
    shutdown.cancel();
}
