use crate::codec::{CodecConfig, DEFAULT_MAX_PAYLOAD_BYTES, default_host};
use crate::consumer::ConsumerConfig;
use crate::reliability::{RetryPolicy, RetryStrategy};
use crate::supervisor::SupervisorConfig;
use crate::transport::config::MIN_UDP_CHUNK_SIZE;
use crate::transport::{TransportConfig, TransportMode};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Inline TOML configuration, used when no config file is given.
pub const INLINE_CONFIG_ENV: &str = "RELAY_CONFIG";

const MAX_CONSUMER_WORKERS: usize = 64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
    #[error(transparent)]
    Cli(#[from] clap::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ConfigError::EnvError(format!("Invalid log level: {s}"))),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Output format of the relay's own logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, compact
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Log sink (Graylog) host name or address
    #[arg(long, env = "SINK_HOST", default_value = "graylog")]
    pub sink_host: String,

    /// Log sink GELF input port
    #[arg(long, env = "SINK_PORT", default_value = "12201")]
    pub sink_port: u16,

    /// Wire transport towards the sink
    #[arg(long, env = "SINK_TRANSPORT", default_value = "udp")]
    pub transport: TransportMode,

    /// Capacity of the outbound send queue
    #[arg(long, env = "QUEUE_CAPACITY", default_value = "512")]
    pub queue_capacity: usize,

    /// Connect timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "5000")]
    pub connect_timeout_ms: u64,

    /// Delay between reconnect attempts while degraded, in milliseconds
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value = "1000")]
    pub reconnect_delay_ms: u64,

    /// Per-send timeout in milliseconds
    #[arg(long, env = "SEND_TIMEOUT_MS", default_value = "5000")]
    pub send_timeout_ms: u64,

    /// Send attempts per message before it is dropped
    #[arg(long, env = "MAX_SEND_ATTEMPTS", default_value = "3")]
    pub max_send_attempts: u32,

    /// Backoff between send attempts of one message
    #[arg(long, env = "RETRY_STRATEGY", default_value = "exponential")]
    pub retry_strategy: RetryStrategy,

    /// First retry delay in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "100")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for any retry delay, in milliseconds
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "1000")]
    pub retry_max_delay_ms: u64,

    /// Time allowed to flush the queue on shutdown, in milliseconds
    #[arg(long, env = "FLUSH_GRACE_MS", default_value = "2000")]
    pub flush_grace_ms: u64,

    /// Disable Nagle's algorithm on TCP links
    #[arg(long, env = "TCP_NO_DELAY", default_value_t = true, action = ArgAction::Set)]
    pub tcp_no_delay: bool,

    /// Socket send buffer size in bytes (TCP)
    #[arg(long, env = "SEND_BUFFER_SIZE", default_value = "32768")]
    pub send_buffer_size: u32,

    /// Gzip datagrams (UDP only)
    #[arg(long, env = "COMPRESSION", default_value_t = true, action = ArgAction::Set)]
    pub compression: bool,

    /// Maximum datagram size before chunking (UDP only)
    #[arg(long, env = "UDP_CHUNK_SIZE", default_value = "8192")]
    pub udp_chunk_size: usize,

    /// GELF `host` field (defaults to this machine's hostname)
    #[arg(long, env = "GELF_HOST")]
    pub gelf_host: Option<String>,

    /// Topic to consume
    #[arg(long, env = "LOG_TOPIC", default_value = "logs")]
    pub topic: String,

    /// Consumer group name
    #[arg(long, env = "CONSUMER_GROUP", default_value = "log-consumers")]
    pub consumer_group: String,

    /// Kafka bootstrap servers (only used with the `kafka` feature)
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub brokers: String,

    /// Concurrent consumers in the group
    #[arg(long, env = "CONSUMER_WORKERS", default_value = "1")]
    pub consumer_workers: usize,

    /// Maximum messages per poll
    #[arg(long, env = "POLL_BATCH_SIZE", default_value = "100")]
    pub poll_batch_size: usize,

    /// Enqueue retries while the send queue is full
    #[arg(long, env = "ENQUEUE_RETRY_BUDGET", default_value = "5")]
    pub enqueue_retry_budget: u32,

    /// Value of the `source` field on every forwarded event
    #[arg(long, env = "SOURCE_TAG", default_value = "stream")]
    pub source_tag: String,

    /// Largest accepted raw payload in bytes
    #[arg(long, env = "MAX_PAYLOAD_BYTES", default_value = "1048576")]
    pub max_payload_bytes: usize,

    /// Degraded periods before an alert is raised
    #[arg(long, env = "DEGRADED_ALERT_THRESHOLD", default_value = "3")]
    pub degraded_alert_threshold: u32,

    /// Seconds a single degraded period may last before an alert is raised
    #[arg(long, env = "DEGRADED_ALERT_AFTER_SECS", default_value = "30")]
    pub degraded_alert_after_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Enable metrics export
    #[arg(long, env = "ENABLE_METRICS")]
    pub enable_metrics: bool,

    /// Metrics export port
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,

    /// Read newline-delimited JSON from stdin instead of a broker
    #[arg(long)]
    pub stdin: bool,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sink_host: "graylog".to_string(),
            sink_port: 12201,
            transport: TransportMode::Udp,
            queue_capacity: 512,
            connect_timeout_ms: 5000,
            reconnect_delay_ms: 1000,
            send_timeout_ms: 5000,
            max_send_attempts: 3,
            retry_strategy: RetryStrategy::ExponentialBackoff,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1000,
            flush_grace_ms: 2000,
            tcp_no_delay: true,
            send_buffer_size: 32768,
            compression: true,
            udp_chunk_size: 8192,
            gelf_host: None,
            topic: "logs".to_string(),
            consumer_group: "log-consumers".to_string(),
            brokers: "localhost:9092".to_string(),
            consumer_workers: 1,
            poll_batch_size: 100,
            enqueue_retry_budget: 5,
            source_tag: "stream".to_string(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            degraded_alert_threshold: 3,
            degraded_alert_after_secs: 30,
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            enable_metrics: false,
            metrics_port: 9090,
            stdin: false,
            config_file: None,
        }
    }
}

impl Config {
    /// CLI arguments and their environment fallbacks only.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::try_parse_from(args)?;
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    /// Full startup resolution: a `--config-file` replaces CLI values,
    /// otherwise `RELAY_CONFIG` does, otherwise CLI/env values stand.
    /// `--stdin` always survives from the command line.
    pub fn load<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Config::try_parse_from(args)?;

        let mut config = if let Some(path) = &cli.config_file {
            let mut file_config = Self::read_file(path)?;
            file_config.config_file = Some(path.clone());
            file_config
        } else if let Ok(inline) = std::env::var(INLINE_CONFIG_ENV) {
            toml::from_str(&inline)?
        } else {
            cli.clone()
        };
        config.stdin = config.stdin || cli.stdin;

        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn from_inline_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn post_process(&mut self) {
        if self
            .gelf_host
            .as_deref()
            .is_none_or(|host| host.trim().is_empty())
        {
            self.gelf_host = Some(default_host());
        }
        self.sink_host = self.sink_host.trim().to_string();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sink_host.is_empty() {
            return Err(invalid("Sink host must not be empty"));
        }
        if self.sink_port == 0 {
            return Err(invalid("Sink port must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("Queue capacity must be greater than 0"));
        }
        if self.max_send_attempts == 0 {
            return Err(invalid("Max send attempts must be greater than 0"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "Retry max delay ({}ms) must not be below the base delay ({}ms)",
                self.retry_max_delay_ms, self.retry_base_delay_ms
            )));
        }
        if self.connect_timeout_ms == 0 || self.send_timeout_ms == 0 {
            return Err(invalid("Connect and send timeouts must be greater than 0"));
        }
        if self.udp_chunk_size < MIN_UDP_CHUNK_SIZE {
            return Err(ConfigError::InvalidConfig(format!(
                "UDP chunk size ({}) must be at least {MIN_UDP_CHUNK_SIZE}",
                self.udp_chunk_size
            )));
        }
        if self.topic.trim().is_empty() || self.consumer_group.trim().is_empty() {
            return Err(invalid("Topic and consumer group must not be empty"));
        }
        if self.consumer_workers == 0 || self.consumer_workers > MAX_CONSUMER_WORKERS {
            return Err(ConfigError::InvalidConfig(format!(
                "Consumer workers ({}) must be between 1 and {MAX_CONSUMER_WORKERS}",
                self.consumer_workers
            )));
        }
        if self.poll_batch_size == 0 {
            return Err(invalid("Poll batch size must be greater than 0"));
        }
        if self.max_payload_bytes == 0 {
            return Err(invalid("Max payload bytes must be greater than 0"));
        }
        if self.degraded_alert_threshold == 0 {
            return Err(invalid("Degraded alert threshold must be greater than 0"));
        }
        if self.source_tag.trim().is_empty() {
            return Err(invalid("Source tag must not be empty"));
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            host: self.sink_host.clone(),
            port: self.sink_port,
            mode: self.transport,
            queue_capacity: self.queue_capacity,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            flush_grace: Duration::from_millis(self.flush_grace_ms),
            retry: RetryPolicy {
                max_attempts: self.max_send_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                strategy: self.retry_strategy,
                ..RetryPolicy::default()
            },
            tcp_no_delay: self.tcp_no_delay,
            send_buffer_size: self.send_buffer_size,
            compression: self.compression,
            udp_chunk_size: self.udp_chunk_size,
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            topic: self.topic.clone(),
            consumer_group: self.consumer_group.clone(),
            poll_batch_size: self.poll_batch_size,
            enqueue_retry_budget: self.enqueue_retry_budget,
            ..ConsumerConfig::default()
        }
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            source_tag: self.source_tag.clone(),
            host: self.gelf_host.clone().unwrap_or_else(default_host),
            max_payload_bytes: self.max_payload_bytes,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            transport: self.transport_config(),
            consumer: self.consumer_config(),
            codec: self.codec_config(),
            consumer_workers: self.consumer_workers,
            degraded_alert_after: Duration::from_secs(self.degraded_alert_after_secs),
            degraded_alert_threshold: self.degraded_alert_threshold,
            ..SupervisorConfig::default()
        }
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::InvalidConfig(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let parsed = Config::from_args(["rask-log-relay"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.sink_host, default.sink_host);
        assert_eq!(parsed.sink_port, 12201);
        assert_eq!(parsed.transport, TransportMode::Udp);
        assert_eq!(parsed.queue_capacity, 512);
        assert!(parsed.tcp_no_delay);
        assert!(parsed.compression);
        assert!(parsed.gelf_host.is_some());
    }

    #[test]
    fn test_boolean_flags_take_values() {
        let config = Config::from_args([
            "rask-log-relay",
            "--compression",
            "false",
            "--tcp-no-delay",
            "false",
            "--transport",
            "tcp",
        ])
        .unwrap();
        assert!(!config.compression);
        assert!(!config.tcp_no_delay);
        assert_eq!(config.transport, TransportMode::Tcp);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_args(["rask-log-relay", "--queue-capacity", "0"]).is_err());
        assert!(Config::from_args(["rask-log-relay", "--consumer-workers", "65"]).is_err());
        assert!(Config::from_args(["rask-log-relay", "--udp-chunk-size", "100"]).is_err());
        assert!(matches!(
            Config::from_args(["rask-log-relay", "--transport", "carrier-pigeon"]),
            Err(ConfigError::Cli(_))
        ));
    }

    #[test]
    fn test_inline_toml_uses_defaults_for_missing_fields() {
        let config = Config::from_inline_toml(
            r#"
sink_host = "graylog.internal"
transport = "tcp"
consumer_workers = 4
"#,
        )
        .unwrap();
        assert_eq!(config.sink_host, "graylog.internal");
        assert_eq!(config.transport, TransportMode::Tcp);
        assert_eq!(config.consumer_workers, 4);
        assert_eq!(config.topic, "logs");
        assert_eq!(config.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_derived_component_configs() {
        let config = Config {
            max_send_attempts: 5,
            flush_grace_ms: 750,
            gelf_host: Some("relay-1".to_string()),
            ..Config::default()
        };

        let transport = config.transport_config();
        assert_eq!(transport.retry.max_attempts, 5);
        assert_eq!(transport.retry.strategy, RetryStrategy::ExponentialBackoff);
        assert_eq!(transport.retry.base_delay, Duration::from_millis(100));
        assert_eq!(transport.retry.max_delay, Duration::from_secs(1));
        assert_eq!(transport.flush_grace, Duration::from_millis(750));

        let supervisor = config.supervisor_config();
        assert_eq!(supervisor.codec.host, "relay-1");
        assert_eq!(supervisor.degraded_alert_after, Duration::from_secs(30));
        assert_eq!(supervisor.consumer.consumer_group, "log-consumers");
    }

    #[test]
    fn test_retry_strategy_selection() {
        let config = Config::from_args([
            "rask-log-relay",
            "--retry-strategy",
            "linear",
            "--retry-base-delay-ms",
            "50",
            "--retry-max-delay-ms",
            "400",
        ])
        .unwrap();
        let retry = config.transport_config().retry;
        assert_eq!(retry.strategy, RetryStrategy::LinearBackoff);
        assert!(retry.calculate_delay(2) <= Duration::from_millis(225));

        let from_toml = Config::from_inline_toml("retry_strategy = \"fixed\"").unwrap();
        assert_eq!(from_toml.retry_strategy, RetryStrategy::FixedDelay);

        assert!(matches!(
            Config::from_args([
                "rask-log-relay",
                "--retry-base-delay-ms",
                "500",
                "--retry-max-delay-ms",
                "100",
            ]),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(<LogLevel as std::str::FromStr>::from_str("WARNING").unwrap(), LogLevel::Warn);
        assert_eq!(<LogLevel as std::str::FromStr>::from_str(" debug ").unwrap(), LogLevel::Debug);
        assert!(<LogLevel as std::str::FromStr>::from_str("loud").is_err());
        assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
    }
}
