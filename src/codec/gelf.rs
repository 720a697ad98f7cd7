// GELF 1.1 record model and JSON serialization.
use crate::domain::Severity;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const GELF_VERSION: &str = "1.1";

/// Syslog-style severity scale used by the sink. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum GelfLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Informational = 6,
    Debug = 7,
}

impl GelfLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<Severity> for GelfLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => GelfLevel::Critical,
            Severity::Error => GelfLevel::Error,
            Severity::Warn => GelfLevel::Warning,
            Severity::Info => GelfLevel::Informational,
            Severity::Debug | Severity::Trace => GelfLevel::Debug,
        }
    }
}

/// A sink-format record, built fresh from a decoded `LogEvent`.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub host: String,
    pub short_message: String,
    pub full_message: String,
    pub level: GelfLevel,
    pub timestamp_ms: i64,
    pub additional_fields: BTreeMap<String, String>,
}

impl WireMessage {
    /// Serialize into a GELF JSON document.
    ///
    /// Additional fields are emitted with the mandatory `_` prefix; the GELF
    /// timestamp is seconds since the epoch with millisecond precision.
    pub fn to_gelf_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut doc = Map::with_capacity(6 + self.additional_fields.len());
        doc.insert("version".into(), Value::from(GELF_VERSION));
        doc.insert("host".into(), Value::from(self.host.as_str()));
        doc.insert(
            "short_message".into(),
            Value::from(self.short_message.as_str()),
        );
        doc.insert(
            "full_message".into(),
            Value::from(self.full_message.as_str()),
        );
        doc.insert(
            "timestamp".into(),
            Value::from(self.timestamp_ms as f64 / 1000.0),
        );
        doc.insert("level".into(), Value::from(self.level.as_u8()));

        for (key, value) in &self.additional_fields {
            doc.insert(format!("_{key}"), Value::from(value.as_str()));
        }

        serde_json::to_vec(&Value::Object(doc))
    }
}
