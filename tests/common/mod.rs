#![allow(dead_code)]

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rask_log_relay::codec::{GelfLevel, WireMessage};
use rask_log_relay::reliability::{RetryPolicy, RetryStrategy};
use rask_log_relay::transport::{Connector, SinkLink, TransportConfig, TransportMode};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Shared knobs and observations for `ScriptedConnector`.
#[derive(Default)]
pub struct Script {
    pub refuse_connects: AtomicBool,
    pub failing_sends: AtomicUsize,
    pub stall_sends: AtomicBool,
    pub connects: AtomicUsize,
    pub delivered: Mutex<Vec<Bytes>>,
}

impl Script {
    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Delivered GELF documents, parsed.
    pub fn delivered_json(&self) -> Vec<serde_json::Value> {
        self.delivered
            .lock()
            .iter()
            .map(|payload| {
                let json = payload.strip_suffix(b"\0").unwrap_or(payload.as_ref());
                serde_json::from_slice(json).unwrap()
            })
            .collect()
    }

    pub fn delivered_short_messages(&self) -> Vec<String> {
        self.delivered_json()
            .iter()
            .map(|doc| doc["short_message"].as_str().unwrap().to_string())
            .collect()
    }
}

/// In-test connector whose links fail, stall or record on demand.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<Box<dyn SinkLink>>> {
        let script = Arc::clone(&self.script);
        Box::pin(async move {
            if script.refuse_connects.load(Ordering::SeqCst) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "scripted refusal",
                ));
            }
            script.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedLink { script }) as Box<dyn SinkLink>)
        })
    }

    fn target(&self) -> String {
        "scripted://sink".to_string()
    }
}

struct ScriptedLink {
    script: Arc<Script>,
}

impl SinkLink for ScriptedLink {
    fn send<'a>(&'a mut self, frames: &'a [Bytes]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            if self.script.stall_sends.load(Ordering::SeqCst) {
                futures::future::pending::<()>().await;
            }
            let failed = self
                .script
                .failing_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure"));
            }
            let payload: Vec<u8> = frames.iter().flat_map(|f| f.iter().copied()).collect();
            self.script.delivered.lock().push(Bytes::from(payload));
            Ok(())
        })
    }
}

/// Fast retries without jitter so timing-sensitive tests stay deterministic.
pub fn fast_config(mode: TransportMode) -> TransportConfig {
    TransportConfig {
        host: "127.0.0.1".to_string(),
        mode,
        compression: false,
        connect_timeout: Duration::from_millis(500),
        reconnect_delay: Duration::from_millis(50),
        send_timeout: Duration::from_millis(500),
        flush_grace: Duration::from_millis(500),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: false,
        },
        ..TransportConfig::default()
    }
}

pub fn wire(short_message: &str) -> WireMessage {
    let mut additional_fields = BTreeMap::new();
    additional_fields.insert("service".to_string(), "checkout".to_string());
    additional_fields.insert("source".to_string(), "stream".to_string());
    WireMessage {
        host: "relay-test".to_string(),
        short_message: short_message.to_string(),
        full_message: format!(r#"{{"message":"{short_message}"}}"#),
        level: GelfLevel::Error,
        timestamp_ms: 1_705_314_645_123,
        additional_fields,
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
