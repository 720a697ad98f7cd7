//! Conversion between raw stream payloads, `LogEvent`, and the sink's GELF
//! wire format.

pub mod gelf;

pub use gelf::{GelfLevel, WireMessage};

use crate::domain::log_event::{DEFAULT_SOURCE, LogEventBuilder};
use crate::domain::{LogEvent, MessageContext, map_level};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Default upper bound on a single raw payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Epoch values above this are taken to be milliseconds rather than seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Fields with dedicated handling, never copied into `extra`.
const RESERVED_FIELDS: &[&str] = &["timestamp", "message", "level", "service", "source", "id", "_id"];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,
    #[error("Payload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Payload is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Tag identifying this pipeline as the event origin.
    pub source_tag: String,
    /// GELF `host` field.
    pub host: String,
    pub max_payload_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            source_tag: DEFAULT_SOURCE.to_string(),
            host: default_host(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Hostname of this machine, or a fixed fallback.
pub fn default_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "rask-log-relay".to_string())
}

#[derive(Debug, Clone)]
pub struct EventCodec {
    config: CodecConfig,
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl EventCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Decode a raw payload, using the current time for missing timestamps.
    pub fn decode(&self, raw: &[u8], ctx: &MessageContext) -> Result<LogEvent, DecodeError> {
        self.decode_at(raw, ctx, Utc::now())
    }

    /// Decode with an explicit decode-time instant.
    ///
    /// Only structural problems fail. Missing or badly typed individual fields
    /// fall back to their defaults, and a timestamp that cannot be parsed is
    /// treated as absent.
    pub fn decode_at(
        &self,
        raw: &[u8],
        ctx: &MessageContext,
        now: DateTime<Utc>,
    ) -> Result<LogEvent, DecodeError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }
        if raw.len() > self.config.max_payload_bytes {
            return Err(DecodeError::TooLarge {
                size: raw.len(),
                max: self.config.max_payload_bytes,
            });
        }

        let value: Value = serde_json::from_slice(raw)?;
        let Value::Object(fields) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let timestamp = match fields.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(raw_ts) => {
                let parsed = parse_timestamp(raw_ts);
                if parsed.is_none() {
                    debug!(
                        topic = %ctx.topic,
                        partition = ctx.partition,
                        offset = ctx.offset,
                        "Unparsable timestamp {}, using decode time",
                        raw_ts
                    );
                }
                parsed
            }
        };

        let level = scalar_string(fields.get("level"))
            .map(|raw_level| map_level(&raw_level))
            .unwrap_or_default();

        let mut builder = LogEvent::builder(self.config.source_tag.as_str())
            .timestamp(timestamp)
            .message(scalar_string(fields.get("message")))
            .level(level)
            .service(scalar_string(fields.get("service")));

        collect_extra(&mut builder, &fields, ctx);

        Ok(builder.build(now))
    }

    /// Build the sink record for `event`. `raw_original` becomes the full message.
    pub fn encode(&self, event: &LogEvent, raw_original: &[u8]) -> WireMessage {
        let mut additional_fields = event.extra().clone();
        additional_fields.insert("source".to_string(), event.source().to_string());
        additional_fields.insert("service".to_string(), event.service().to_string());

        WireMessage {
            host: self.config.host.clone(),
            short_message: event.message().to_string(),
            full_message: String::from_utf8_lossy(raw_original).into_owned(),
            level: GelfLevel::from(event.level()),
            timestamp_ms: event.timestamp().timestamp_millis(),
            additional_fields,
        }
    }
}

/// Strings pass through; numbers and booleans are stringified; anything else is absent.
fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => {
            let epoch = n.as_f64()?;
            let millis = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
                epoch
            } else {
                epoch * 1000.0
            };
            if !millis.is_finite() {
                return None;
            }
            Utc.timestamp_millis_opt(millis.round() as i64).single()
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Zone-less local date-times are read as UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn collect_extra(builder: &mut LogEventBuilder, fields: &Map<String, Value>, ctx: &MessageContext) {
    for (key, value) in fields {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let Some(text) = scalar_string(Some(value)) else {
            continue;
        };
        if !builder.try_extra(key, text) {
            debug!(
                topic = %ctx.topic,
                partition = ctx.partition,
                offset = ctx.offset,
                "Skipping extra field '{}'",
                key
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn codec() -> EventCodec {
        EventCodec::new(CodecConfig {
            host: "test-host".to_string(),
            ..CodecConfig::default()
        })
    }

    fn decode(raw: &str) -> Result<LogEvent, DecodeError> {
        codec().decode(raw.as_bytes(), &MessageContext::detached())
    }

    #[test]
    fn test_missing_level_is_info() {
        let event = decode(r#"{"message":"hi","service":"svc"}"#).unwrap();
        assert_eq!(event.level(), Severity::Info);
    }

    #[test]
    fn test_warn_variants_decode_to_warn() {
        for level in ["warn", "WARNING", "Warn"] {
            let raw = format!(r#"{{"message":"m","level":"{level}"}}"#);
            assert_eq!(decode(&raw).unwrap().level(), Severity::Warn, "{level}");
        }
    }

    #[test]
    fn test_unparsable_timestamp_uses_decode_time() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let event = codec()
            .decode_at(
                br#"{"message":"m","timestamp":"yesterday-ish"}"#,
                &MessageContext::detached(),
                now,
            )
            .unwrap();
        assert_eq!(event.timestamp(), now);
    }

    #[test]
    fn test_rfc3339_timestamp_is_parsed() {
        let event = decode(r#"{"timestamp":"2024-01-01T12:00:00.250Z"}"#).unwrap();
        assert_eq!(event.timestamp().timestamp_millis(), 1_704_110_400_250);
    }

    #[test]
    fn test_zoneless_timestamp_read_as_utc() {
        let event = decode(r#"{"timestamp":"2024-01-01T12:00:00.5"}"#).unwrap();
        assert_eq!(event.timestamp().timestamp_millis(), 1_704_110_400_500);
    }

    #[test]
    fn test_numeric_timestamps_seconds_and_millis() {
        let secs = decode(r#"{"timestamp":1704110400.25}"#).unwrap();
        assert_eq!(secs.timestamp().timestamp_millis(), 1_704_110_400_250);

        let millis = decode(r#"{"timestamp":1704110400250}"#).unwrap();
        assert_eq!(millis.timestamp().timestamp_millis(), 1_704_110_400_250);
    }

    #[test]
    fn test_defaults_for_empty_object() {
        let event = decode("{}").unwrap();
        assert_eq!(event.message(), "No message");
        assert_eq!(event.service(), "unknown");
        assert_eq!(event.source(), "stream");
    }

    #[test]
    fn test_malformed_payloads_fail() {
        assert!(matches!(decode("not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(r#"{"message":"#), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode("   "), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let codec = EventCodec::new(CodecConfig {
            max_payload_bytes: 8,
            ..CodecConfig::default()
        });
        let result = codec.decode(br#"{"message":"too long"}"#, &MessageContext::detached());
        assert!(matches!(result, Err(DecodeError::TooLarge { max: 8, .. })));
    }

    #[test]
    fn test_producer_cannot_override_source() {
        let event = decode(r#"{"source":"spoofed","message":"m"}"#).unwrap();
        assert_eq!(event.source(), "stream");
        assert!(!event.extra().contains_key("source"));
    }

    #[test]
    fn test_extra_fields_carried_into_wire_message() {
        let raw = r#"{"message":"m","service":"svc","request_id":"abc","status":503,"nested":{"a":1}}"#;
        let event = decode(raw).unwrap();
        let wire = codec().encode(&event, raw.as_bytes());

        assert_eq!(wire.additional_fields.get("request_id").map(String::as_str), Some("abc"));
        assert_eq!(wire.additional_fields.get("status").map(String::as_str), Some("503"));
        assert!(!wire.additional_fields.contains_key("nested"));
        assert_eq!(wire.additional_fields.get("service").map(String::as_str), Some("svc"));
    }

    #[test]
    fn test_encode_scenario() {
        let raw = r#"{"message":"hello","level":"warn","service":"svc1"}"#;
        let before = Utc::now();
        let event = decode(raw).unwrap();
        let after = Utc::now();

        assert_eq!(event.message(), "hello");
        assert_eq!(event.level(), Severity::Warn);
        assert_eq!(event.service(), "svc1");
        assert!(event.timestamp() >= before && event.timestamp() <= after);

        let wire = codec().encode(&event, raw.as_bytes());
        assert_eq!(wire.level.as_u8(), 4);
        assert_eq!(wire.short_message, "hello");
        assert_eq!(wire.full_message, raw);
        assert_eq!(wire.host, "test-host");
        assert_eq!(wire.timestamp_ms, event.timestamp().timestamp_millis());
        assert_eq!(wire.additional_fields.len(), 2);
        assert_eq!(wire.additional_fields["source"], "stream");
        assert_eq!(wire.additional_fields["service"], "svc1");
    }

    #[test]
    fn test_encode_critical_and_trace_levels() {
        let critical = decode(r#"{"level":"FATAL"}"#).unwrap();
        assert_eq!(codec().encode(&critical, b"").level.as_u8(), 2);

        let trace = decode(r#"{"level":"trace"}"#).unwrap();
        assert_eq!(codec().encode(&trace, b"").level.as_u8(), 7);
    }
}
