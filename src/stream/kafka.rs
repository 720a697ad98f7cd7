use super::{StreamCursor, StreamError, StreamMessage, StreamSource};
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Kafka group member with auto-commit disabled. The underlying consumer is
/// created on `subscribe`, once the group id is known.
pub struct KafkaSource {
    brokers: String,
    session_timeout_ms: u32,
    consumer: Option<StreamConsumer>,
}

impl KafkaSource {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            session_timeout_ms: 10_000,
            consumer: None,
        }
    }

    fn consumer(&self) -> Result<&StreamConsumer, StreamError> {
        self.consumer.as_ref().ok_or(StreamError::NotSubscribed)
    }
}

fn owned(message: &rdkafka::message::BorrowedMessage<'_>) -> StreamMessage {
    StreamMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
    }
}

impl StreamSource for KafkaSource {
    async fn subscribe(&mut self, topic: &str, group: &str) -> Result<(), StreamError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .create()
            .map_err(|e| StreamError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| StreamError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            "Subscribed to Kafka topic '{}' as group '{}' via {}",
            topic, group, self.brokers
        );
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn poll(&mut self, max: usize, timeout: Duration) -> Result<Vec<StreamMessage>, StreamError> {
        let consumer = self.consumer()?;
        let deadline = Instant::now() + timeout;
        let mut batch = Vec::with_capacity(max.min(1024));

        while batch.len() < max {
            // Once something arrived, only take what is already buffered.
            let wait_until = if batch.is_empty() {
                deadline
            } else {
                Instant::now()
            };
            match tokio::time::timeout_at(wait_until, consumer.recv()).await {
                Ok(Ok(message)) => batch.push(owned(&message)),
                Ok(Err(e)) if batch.is_empty() => return Err(StreamError::Poll(e.to_string())),
                Ok(Err(e)) => {
                    debug!("Kafka receive error after partial batch: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(batch)
    }

    async fn commit(&mut self, cursor: &StreamCursor) -> Result<(), StreamError> {
        let consumer = self.consumer()?;
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&cursor.topic, cursor.partition, Offset::Offset(cursor.offset + 1))
            .map_err(|e| StreamError::Commit {
                cursor: cursor.to_string(),
                reason: e.to_string(),
            })?;
        consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| StreamError::Commit {
                cursor: cursor.to_string(),
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            debug!("Kafka consumer closed");
        }
    }
}
