//! Listing producer
//!
//! Assigns event IDs, derives partition keys and publishes encoded events.
//! Transient broker failures are retried with exponential backoff up to the
//! attempt ceiling; a send that still fails is reported, never dropped.

pub mod replay;
pub mod synthetic;

use event_schema::{ListingEvent, ListingPayload};
use resilience::{with_retry, RetryConfig, RetryError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::broker::{BrokerError, Delivery, EventPublisher};
use crate::metrics;
pub use replay::{read_replay_file, ReplayError};
pub use synthetic::ListingGenerator;

#[derive(Debug, thiserror::Error)]
pub enum PublishFailure {
    #[error("Failed to publish {event_id} after {attempts} attempts: {last_error}")]
    Exhausted {
        event_id: String,
        attempts: u32,
        last_error: BrokerError,
    },

    #[error("Broker rejected {event_id}: {error}")]
    Rejected { event_id: String, error: BrokerError },

    #[error("Failed to encode {event_id}: {message}")]
    Encode { event_id: String, message: String },
}

impl PublishFailure {
    pub fn event_id(&self) -> &str {
        match self {
            PublishFailure::Exhausted { event_id, .. }
            | PublishFailure::Rejected { event_id, .. }
            | PublishFailure::Encode { event_id, .. } => event_id,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PublishFailure::Exhausted { attempts, .. } => *attempts,
            PublishFailure::Rejected { .. } => 1,
            PublishFailure::Encode { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub failed: u64,
}

pub struct ListingProducer {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    retry: RetryConfig,
}

impl ListingProducer {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            retry,
        }
    }

    /// Publish a payload as a new event; returns the assigned event ID
    pub async fn publish(&self, payload: ListingPayload) -> Result<String, PublishFailure> {
        let event = ListingEvent::new(payload);
        self.publish_event(&event).await?;
        Ok(event.event_id)
    }

    pub async fn publish_event(&self, event: &ListingEvent) -> Result<Delivery, PublishFailure> {
        let bytes = event_schema::encode(event).map_err(|e| PublishFailure::Encode {
            event_id: event.event_id.clone(),
            message: e.to_string(),
        })?;

        let result = with_retry(&self.retry, |attempt| {
            if attempt > 1 {
                debug!(event_id = %event.event_id, attempt, "Retrying publish");
            }
            self.publisher
                .send(&self.topic, &event.partition_key, &bytes)
        })
        .await;

        match result {
            Ok(delivery) => {
                metrics::PUBLISH_RESULTS.with_label_values(&["ok"]).inc();
                debug!(
                    event_id = %event.event_id,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Listing event published"
                );
                Ok(delivery)
            }
            Err(e) => {
                metrics::PUBLISH_RESULTS.with_label_values(&["failed"]).inc();
                error!(event_id = %event.event_id, error = %e, "Failed to publish listing event");

                Err(match e {
                    RetryError::Exhausted {
                        attempts,
                        last_error,
                    } => PublishFailure::Exhausted {
                        event_id: event.event_id.clone(),
                        attempts,
                        last_error,
                    },
                    RetryError::Permanent { error, .. } => PublishFailure::Rejected {
                        event_id: event.event_id.clone(),
                        error,
                    },
                })
            }
        }
    }

    /// Publish events in order, pacing sends by `interval`; failures are counted and logged
    pub async fn publish_all<I>(&self, events: I, interval: Duration) -> PublishStats
    where
        I: IntoIterator<Item = ListingEvent>,
    {
        let mut stats = PublishStats::default();

        for event in events {
            match self.publish_event(&event).await {
                Ok(_) => stats.published += 1,
                Err(_) => stats.failed += 1,
            }

            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        info!(
            topic = %self.topic,
            published = stats.published,
            failed = stats.failed,
            "Publishing finished"
        );
        stats
    }
}
