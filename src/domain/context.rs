use std::fmt;

/// Stream coordinates of the message currently being processed.
///
/// Passed by reference through decode and log emission so that diagnostic
/// fields travel with the message instead of living in shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub consumer_group: String,
}

impl MessageContext {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            consumer_group: consumer_group.into(),
        }
    }

    /// Context for payloads that did not come off a stream (tests, benches, stdin).
    pub fn detached() -> Self {
        Self::new("-", -1, -1, "-")
    }
}

impl fmt::Display for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]@{} ({})",
            self.topic, self.partition, self.offset, self.consumer_group
        )
    }
}
