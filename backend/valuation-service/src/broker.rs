//! Broker seams
//!
//! The pipeline talks to the log-structured broker through two narrow traits:
//! [`EventSource`] for pulling and committing, [`EventPublisher`] for sending.
//! Kafka implementations live in [`crate::kafka`]; [`crate::memory`] provides an
//! in-process broker for tests and local runs.

use async_trait::async_trait;
use resilience::Retryable;
use std::time::Duration;

/// Broker error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker rejected message: {0}")]
    Rejected(String),

    #[error("Offset commit failed: {0}")]
    Commit(String),
}

impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        !matches!(self, BrokerError::Rejected(_))
    }
}

/// A record pulled from a partition, detached from the client's buffers
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl SourceRecord {
    /// Fallback identity for records whose payload cannot be decoded
    pub fn coordinates(&self) -> String {
        format!("{}-{}-{}", self.topic, self.partition, self.offset)
    }
}

/// Where a published message landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Pull side of the broker.
///
/// `poll` must not lose records: everything it returns is owned by the caller,
/// and records it does not return stay available for a later poll.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Pull up to `max` records, waiting at most `timeout` for the first one
    async fn poll(&self, max: usize, timeout: Duration) -> Result<Vec<SourceRecord>, BrokerError>;

    /// Commit `next_offset` (the offset of the next record to read) for a partition
    async fn commit(&self, partition: i32, next_offset: i64) -> Result<(), BrokerError>;
}

/// Push side of the broker
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<Delivery, BrokerError>;
}
