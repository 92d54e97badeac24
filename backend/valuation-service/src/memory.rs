//! In-process broker
//!
//! Partitioned, offset-addressed topics with consumer-side commit positions.
//! Used by the unit and integration tests. Supports fault injection (failing
//! sends and commits) to exercise retry paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{BrokerError, Delivery, EventPublisher, EventSource, SourceRecord};

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<StoredMessage>>>,
    committed: HashMap<(String, i32), i64>,
    commit_log: Vec<(String, i32, i64)>,
    fail_sends: u32,
    reject_sends: bool,
    fail_commits: u32,
}

pub struct MemoryBroker {
    partitions: usize,
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new(partitions: usize) -> Arc<Self> {
        Arc::new(Self {
            partitions: partitions.max(1),
            state: Mutex::new(BrokerState::default()),
            notify: Notify::new(),
        })
    }

    /// Keyed messages always map to the same partition
    pub fn partition_for(&self, key: Option<&str>) -> i32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions as u64) as i32
            }
            None => 0,
        }
    }

    /// Append directly, bypassing fault injection
    pub fn produce(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Delivery {
        let partition = self.partition_for(key);
        let offset = {
            let mut state = self.state.lock();
            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions]);
            let partition_log = &mut log[partition as usize];
            partition_log.push(StoredMessage {
                key: key.map(str::to_string),
                payload: payload.to_vec(),
            });
            (partition_log.len() - 1) as i64
        };

        self.notify.notify_waiters();
        Delivery { partition, offset }
    }

    /// Every message in a topic, ordered by partition then offset
    pub fn messages(&self, topic: &str) -> Vec<SourceRecord> {
        let state = self.state.lock();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };

        log.iter()
            .enumerate()
            .flat_map(|(partition, messages)| {
                messages.iter().enumerate().map(move |(offset, m)| SourceRecord {
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset: offset as i64,
                    key: m.key.clone(),
                    payload: m.payload.clone(),
                })
            })
            .collect()
    }

    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .committed
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Commits in the order they were made, as `(partition, next_offset)`
    pub fn commit_log(&self, topic: &str) -> Vec<(i32, i64)> {
        self.state
            .lock()
            .commit_log
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, p, o)| (*p, *o))
            .collect()
    }

    pub fn fail_next_sends(&self, count: u32) {
        self.state.lock().fail_sends = count;
    }

    pub fn reject_sends(&self, reject: bool) {
        self.state.lock().reject_sends = reject;
    }

    pub fn fail_next_commits(&self, count: u32) {
        self.state.lock().fail_commits = count;
    }

    /// Consumer positioned at the committed offsets of `topic`
    pub fn source(self: &Arc<Self>, topic: &str) -> MemorySource {
        MemorySource {
            broker: Arc::clone(self),
            topic: topic.to_string(),
            positions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<Delivery, BrokerError> {
        {
            let mut state = self.state.lock();
            if state.reject_sends {
                return Err(BrokerError::Rejected(format!("topic {} rejects writes", topic)));
            }
            if state.fail_sends > 0 {
                state.fail_sends -= 1;
                return Err(BrokerError::Unavailable("injected send failure".to_string()));
            }
        }

        Ok(self.produce(topic, Some(key), payload))
    }
}

pub struct MemorySource {
    broker: Arc<MemoryBroker>,
    topic: String,
    positions: Mutex<HashMap<i32, i64>>,
}

impl MemorySource {
    fn take(&self, max: usize) -> Vec<SourceRecord> {
        let state = self.broker.state.lock();
        let Some(log) = state.topics.get(&self.topic) else {
            return Vec::new();
        };

        let mut positions = self.positions.lock();
        let mut records = Vec::new();

        for (partition, messages) in log.iter().enumerate() {
            let partition = partition as i32;
            let position = positions.entry(partition).or_insert_with(|| {
                state
                    .committed
                    .get(&(self.topic.clone(), partition))
                    .copied()
                    .unwrap_or(0)
            });

            while records.len() < max && (*position as usize) < messages.len() {
                let message = &messages[*position as usize];
                records.push(SourceRecord {
                    topic: self.topic.clone(),
                    partition,
                    offset: *position,
                    key: message.key.clone(),
                    payload: message.payload.clone(),
                });
                *position += 1;
            }
        }

        records
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn poll(&self, max: usize, timeout: Duration) -> Result<Vec<SourceRecord>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Registered before checking so a concurrent produce is not missed
            let notified = self.broker.notify.notified();

            let records = self.take(max);
            if !records.is_empty() || max == 0 {
                return Ok(records);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&self, partition: i32, next_offset: i64) -> Result<(), BrokerError> {
        let mut state = self.broker.state.lock();

        if state.fail_commits > 0 {
            state.fail_commits -= 1;
            return Err(BrokerError::Commit("injected commit failure".to_string()));
        }

        state
            .committed
            .insert((self.topic.clone(), partition), next_offset);
        state
            .commit_log
            .push((self.topic.clone(), partition, next_offset));
        Ok(())
    }
}
