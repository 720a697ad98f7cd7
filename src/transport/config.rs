use crate::reliability::RetryPolicy;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Wire transport towards the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Connectionless datagrams, fire-and-forget (default)
    #[default]
    Udp,
    /// Connection-oriented, NUL-delimited frames, ordered
    Tcp,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Udp => f.write_str("udp"),
            TransportMode::Tcp => f.write_str("tcp"),
        }
    }
}

/// Smallest datagram we are willing to chunk into (GELF WAN size).
pub const MIN_UDP_CHUNK_SIZE: usize = 1420;
/// GELF LAN-safe chunk size.
pub const DEFAULT_UDP_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub mode: TransportMode,
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub send_timeout: Duration,
    pub flush_grace: Duration,
    pub retry: RetryPolicy,
    pub tcp_no_delay: bool,
    pub send_buffer_size: u32,
    pub compression: bool,
    pub udp_chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "graylog".to_string(),
            port: 12201,
            mode: TransportMode::Udp,
            queue_capacity: 512,
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            send_timeout: Duration::from_secs(5),
            flush_grace: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            tcp_no_delay: true,
            send_buffer_size: 32768,
            compression: true,
            udp_chunk_size: DEFAULT_UDP_CHUNK_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("Sink host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("Sink port must be greater than 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be greater than 0".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("Max send attempts must be greater than 0".to_string());
        }
        if self.send_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err("Send and connect timeouts must be greater than 0".to_string());
        }
        if self.udp_chunk_size < MIN_UDP_CHUNK_SIZE {
            return Err(format!(
                "UDP chunk size ({}) must be at least {MIN_UDP_CHUNK_SIZE}",
                self.udp_chunk_size
            ));
        }
        Ok(())
    }

    pub fn target(&self) -> String {
        format!("{}://{}:{}", self.mode, self.host, self.port)
    }
}
