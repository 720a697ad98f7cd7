// In-process partitioned log with per-group committed offsets.
use super::{StreamCursor, StreamError, StreamMessage, StreamSource};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_PARTITIONS: usize = 1;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    payload: Bytes,
}

#[derive(Debug, Default)]
struct Topic {
    partitions: Vec<Vec<StoredRecord>>,
    /// Next offset to read, per (group, partition).
    committed: HashMap<(String, i32), i64>,
    round_robin: usize,
}

impl Topic {
    fn with_partitions(count: usize) -> Self {
        Self {
            partitions: vec![Vec::new(); count.max(1)],
            ..Self::default()
        }
    }

    fn pick_partition(&mut self, key: Option<&[u8]>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % count as u64) as usize
            }
            None => {
                let partition = self.round_robin % count;
                self.round_robin = self.round_robin.wrapping_add(1);
                partition
            }
        }
    }
}

#[derive(Debug, Default)]
struct BrokerInner {
    topics: Mutex<HashMap<String, Topic>>,
    published: Notify,
}

/// Shared handle to an in-memory broker. Clones see the same topics.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `topic` with `partitions` partitions; a no-op if it exists.
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        self.inner
            .topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| Topic::with_partitions(partitions));
    }

    /// Appends a record, returning its `(partition, offset)`. Keyed records
    /// always land on the same partition; unkeyed ones are spread round robin.
    pub fn publish(&self, topic: &str, key: Option<&[u8]>, payload: impl Into<Bytes>) -> (i32, i64) {
        let position = {
            let mut topics = self.inner.topics.lock();
            let topic = topics
                .entry(topic.to_string())
                .or_insert_with(|| Topic::with_partitions(DEFAULT_PARTITIONS));
            let partition = topic.pick_partition(key);
            let log = &mut topic.partitions[partition];
            log.push(StoredRecord {
                key: key.map(Bytes::copy_from_slice),
                payload: payload.into(),
            });
            (partition as i32, (log.len() - 1) as i64)
        };
        self.inner.published.notify_waiters();
        position
    }

    /// Next offset `group` will read from `partition`, if it ever committed.
    pub fn committed(&self, topic: &str, group: &str, partition: i32) -> Option<i64> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.committed.get(&(group.to_string(), partition)).copied())
    }

    /// Records not yet committed by `group`, across all partitions.
    pub fn lag(&self, topic: &str, group: &str) -> i64 {
        let topics = self.inner.topics.lock();
        let Some(t) = topics.get(topic) else {
            return 0;
        };
        t.partitions
            .iter()
            .enumerate()
            .map(|(p, log)| {
                let committed = t
                    .committed
                    .get(&(group.to_string(), p as i32))
                    .copied()
                    .unwrap_or(0);
                log.len() as i64 - committed
            })
            .sum()
    }

    /// Member `index` of a group with `count` members. Partitions are
    /// assigned statically: partition `p` belongs to member `p % count`.
    pub fn subscriber(&self, index: usize, count: usize) -> MemorySubscriber {
        MemorySubscriber {
            broker: self.clone(),
            member_index: index,
            member_count: count.max(1),
            topic: None,
            group: String::new(),
            positions: HashMap::new(),
            closed: false,
        }
    }
}

/// One group member reading from a `MemoryBroker`.
#[derive(Debug)]
pub struct MemorySubscriber {
    broker: MemoryBroker,
    member_index: usize,
    member_count: usize,
    topic: Option<String>,
    group: String,
    /// Fetch position per assigned partition; starts at the committed offset.
    positions: HashMap<i32, i64>,
    closed: bool,
}

impl MemorySubscriber {
    fn fetch(&mut self, max: usize) -> Result<Vec<StreamMessage>, StreamError> {
        let Some(topic_name) = self.topic.as_deref() else {
            return Err(StreamError::NotSubscribed);
        };

        let topics = self.broker.inner.topics.lock();
        let Some(topic) = topics.get(topic_name) else {
            return Ok(Vec::new());
        };

        let mut batch = Vec::new();
        for (index, log) in topic.partitions.iter().enumerate() {
            if index % self.member_count != self.member_index {
                continue;
            }
            let partition = index as i32;
            let position = self.positions.entry(partition).or_insert_with(|| {
                topic
                    .committed
                    .get(&(self.group.clone(), partition))
                    .copied()
                    .unwrap_or(0)
            });

            while batch.len() < max {
                let Some(record) = log.get(*position as usize) else {
                    break;
                };
                batch.push(StreamMessage {
                    topic: topic_name.to_string(),
                    partition,
                    offset: *position,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                });
                *position += 1;
            }
            if batch.len() >= max {
                break;
            }
        }

        Ok(batch)
    }
}

impl StreamSource for MemorySubscriber {
    async fn subscribe(&mut self, topic: &str, group: &str) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.broker.create_topic(topic, DEFAULT_PARTITIONS);
        self.topic = Some(topic.to_string());
        self.group = group.to_string();
        self.positions.clear();
        debug!(
            "Member {}/{} of group '{}' subscribed to '{}'",
            self.member_index, self.member_count, group, topic
        );
        Ok(())
    }

    async fn poll(&mut self, max: usize, timeout: Duration) -> Result<Vec<StreamMessage>, StreamError> {
        let deadline = Instant::now() + timeout;
        let broker = self.broker.clone();

        loop {
            if self.closed {
                return Err(StreamError::Closed);
            }

            let published = broker.inner.published.notified();
            tokio::pin!(published);
            published.as_mut().enable();

            let batch = self.fetch(max)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, published).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&mut self, cursor: &StreamCursor) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let mut topics = self.broker.inner.topics.lock();
        let Some(topic) = topics.get_mut(&cursor.topic) else {
            return Err(StreamError::Commit {
                cursor: cursor.to_string(),
                reason: "unknown topic".to_string(),
            });
        };
        let next = topic
            .committed
            .entry((self.group.clone(), cursor.partition))
            .or_insert(0);
        *next = (*next).max(cursor.offset + 1);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
        self.positions.clear();
    }
}
