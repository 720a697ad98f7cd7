//! Stream collaborators: where raw log payloads come from and where
//! consumption progress is committed.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
pub use memory::{MemoryBroker, MemorySubscriber};

use crate::domain::MessageContext;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Subscription to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("Not subscribed to any topic")]
    NotSubscribed,
    #[error("Poll failed: {0}")]
    Poll(String),
    #[error("Commit of {cursor} failed: {reason}")]
    Commit { cursor: String, reason: String },
    #[error("Stream source is closed")]
    Closed,
}

/// Position of one message, committed once it is safely handed off.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamCursor {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl std::fmt::Display for StreamCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

impl StreamMessage {
    pub fn cursor(&self) -> StreamCursor {
        StreamCursor {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }

    pub fn context(&self, consumer_group: &str) -> MessageContext {
        MessageContext::new(&self.topic, self.partition, self.offset, consumer_group)
    }
}

/// A group member consuming one topic with manual commits.
pub trait StreamSource: Send {
    fn subscribe(
        &mut self,
        topic: &str,
        group: &str,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Up to `max` messages in per-partition order. Returns an empty batch
    /// when nothing arrives within `timeout`.
    fn poll(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<StreamMessage>, StreamError>> + Send;

    /// Marks everything up to and including `cursor` as consumed.
    fn commit(
        &mut self,
        cursor: &StreamCursor,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
