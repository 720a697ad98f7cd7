use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The raw event shape producers publish onto the stream.
///
/// Producers accept a free-text message and an optional level; the timestamp
/// defaults to the publish time and the service to the producer's configured
/// name. One JSON document per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerRecord {
    pub timestamp: String,
    pub message: String,
    pub level: String,
    pub service: String,
}

impl ProducerRecord {
    pub fn new(message: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message: message.into(),
            level: "INFO".to_string(),
            service: service.into(),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
