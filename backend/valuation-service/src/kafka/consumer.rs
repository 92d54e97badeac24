//! Kafka event source
//!
//! Auto-commit is disabled; the consumer loop decides what is safe to commit
//! and calls [`EventSource::commit`] with the next offset to read.

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::broker::{BrokerError, EventSource, SourceRecord};

/// How long a poll keeps collecting once the first record arrived
const BATCH_LINGER: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct KafkaConsumerConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
}

pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventSource {
    pub fn new(config: &KafkaConsumerConfig) -> Result<Self, rdkafka::error::KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            group_id = %config.group_id,
            "Kafka consumer initialized, subscribed to: {}",
            config.topic
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

fn detach(message: &BorrowedMessage<'_>) -> SourceRecord {
    SourceRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn poll(&self, max: usize, timeout: Duration) -> Result<Vec<SourceRecord>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut records = Vec::with_capacity(max);

        while records.len() < max {
            let wait_until = if records.is_empty() {
                deadline
            } else {
                Instant::now() + BATCH_LINGER
            };

            match tokio::time::timeout_at(wait_until, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(message)) => records.push(detach(&message)),
                Ok(Err(e)) if records.is_empty() => {
                    return Err(BrokerError::Unavailable(e.to_string()));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Kafka error mid-batch, returning partial batch");
                    break;
                }
            }
        }

        Ok(records)
    }

    async fn commit(&self, partition: i32, next_offset: i64) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, partition, Offset::Offset(next_offset))
            .map_err(|e| BrokerError::Commit(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }
}
