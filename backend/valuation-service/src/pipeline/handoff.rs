//! Result hand-off
//!
//! A prediction counts as done only once a [`ResultSink`] accepted it; the
//! offset is committed after that, never before.

use async_trait::async_trait;
use event_schema::PredictionResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::broker::{BrokerError, EventPublisher};

#[derive(Debug, Clone, thiserror::Error)]
pub enum HandoffError {
    #[error("Failed to encode result: {0}")]
    Encode(String),

    #[error("Result rejected by destination: {0}")]
    Rejected(String),

    #[error("Result destination unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(&self, result: &PredictionResult) -> Result<(), HandoffError>;
}

/// Writes each result to the structured log
pub struct LogResultSink;

#[async_trait]
impl ResultSink for LogResultSink {
    async fn deliver(&self, result: &PredictionResult) -> Result<(), HandoffError> {
        info!(
            event_id = %result.event_id,
            predicted_price = result.predicted_price,
            model_version = %result.model_version,
            computed_at = %result.computed_at,
            "Prediction"
        );
        Ok(())
    }
}

/// Publishes encoded results to a topic, keyed by event ID
pub struct TopicResultSink {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl TopicResultSink {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl ResultSink for TopicResultSink {
    async fn deliver(&self, result: &PredictionResult) -> Result<(), HandoffError> {
        let bytes =
            event_schema::encode_result(result).map_err(|e| HandoffError::Encode(e.to_string()))?;

        let delivery = self
            .publisher
            .send(&self.topic, &result.event_id, &bytes)
            .await
            .map_err(|e| match e {
                BrokerError::Rejected(_) => HandoffError::Rejected(e.to_string()),
                _ => HandoffError::Unavailable(e.to_string()),
            })?;

        debug!(
            event_id = %result.event_id,
            partition = delivery.partition,
            offset = delivery.offset,
            "Result published"
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryResultSink {
    results: Mutex<Vec<PredictionResult>>,
    fail_next: AtomicU32,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<PredictionResult> {
        self.results.lock().clone()
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn deliver(&self, result: &PredictionResult) -> Result<(), HandoffError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(HandoffError::Unavailable("injected hand-off failure".to_string()));
        }

        self.results.lock().push(result.clone());
        Ok(())
    }
}
