use super::log_level::Severity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_MESSAGE: &str = "No message";
pub const DEFAULT_SERVICE: &str = "unknown";
pub const DEFAULT_SOURCE: &str = "stream";

/// Upper bound on producer-supplied fields carried alongside the known ones.
pub const MAX_EXTRA_FIELDS: usize = 32;

/// A decoded and normalized log event.
///
/// Constructed once by the codec and never mutated afterwards: fields are
/// private and only exposed through accessors. `level` is always a member of
/// `Severity` and `timestamp` is always a valid instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    timestamp: DateTime<Utc>,
    message: String,
    level: Severity,
    service: String,
    source: String,
    extra: BTreeMap<String, String>,
}

impl LogEvent {
    pub fn builder(source: impl Into<String>) -> LogEventBuilder {
        LogEventBuilder::new(source)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn level(&self) -> Severity {
        self.level
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }
}

/// Builder applying the field-level defaults.
#[derive(Debug)]
pub struct LogEventBuilder {
    timestamp: Option<DateTime<Utc>>,
    message: Option<String>,
    level: Severity,
    service: Option<String>,
    source: String,
    extra: BTreeMap<String, String>,
}

impl LogEventBuilder {
    fn new(source: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            message: None,
            level: Severity::Info,
            service: None,
            source: source.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn level(mut self, level: Severity) -> Self {
        self.level = level;
        self
    }

    pub fn service(mut self, service: Option<String>) -> Self {
        self.service = service;
        self
    }

    /// Adds an extra field. Returns `false` when the field was rejected
    /// (map full or key not in `[A-Za-z0-9_.-]`).
    pub fn try_extra(&mut self, key: &str, value: String) -> bool {
        if self.extra.len() >= MAX_EXTRA_FIELDS || !is_valid_field_key(key) {
            return false;
        }
        self.extra.insert(key.to_string(), value);
        true
    }

    /// Finalizes the event. `now` is used when no timestamp was supplied.
    pub fn build(self, now: DateTime<Utc>) -> LogEvent {
        LogEvent {
            timestamp: self.timestamp.unwrap_or(now),
            message: self
                .message
                .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            level: self.level,
            service: self
                .service
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
            source: self.source,
            extra: self.extra,
        }
    }
}

pub fn is_valid_field_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_defaults() {
        let now = Utc::now();
        let event = LogEvent::builder(DEFAULT_SOURCE).build(now);

        assert_eq!(event.message(), DEFAULT_MESSAGE);
        assert_eq!(event.service(), DEFAULT_SERVICE);
        assert_eq!(event.level(), Severity::Info);
        assert_eq!(event.timestamp(), now);
        assert_eq!(event.source(), "stream");
    }

    #[test]
    fn test_empty_service_falls_back_to_unknown() {
        let event = LogEvent::builder("stream")
            .service(Some(String::new()))
            .build(Utc::now());
        assert_eq!(event.service(), "unknown");
    }

    #[test]
    fn test_extra_fields_are_bounded() {
        let mut builder = LogEvent::builder("stream");
        for i in 0..MAX_EXTRA_FIELDS {
            assert!(builder.try_extra(&format!("k{i}"), "v".to_string()));
        }
        assert!(!builder.try_extra("overflow", "v".to_string()));
        assert_eq!(builder.build(Utc::now()).extra().len(), MAX_EXTRA_FIELDS);
    }

    #[test]
    fn test_invalid_extra_keys_rejected() {
        let mut builder = LogEvent::builder("stream");
        assert!(!builder.try_extra("has space", "v".to_string()));
        assert!(!builder.try_extra("", "v".to_string()));
        assert!(builder.try_extra("request.id", "v".to_string()));
    }
}
