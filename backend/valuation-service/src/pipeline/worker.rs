//! Per-event processing
//!
//! Drives one record through decode → validate → predict → hand-off, retrying
//! transient failures with backoff up to the attempt ceiling. Every record ends
//! in exactly one [`Outcome`].

use chrono::{DateTime, Utc};
use event_schema::{DecodeError, ListingEvent};
use futures::FutureExt;
use resilience::{with_deadline, Backoff, RetryConfig, Retryable, TimeoutError};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::handoff::{HandoffError, ResultSink};
use super::in_flight::{EventState, InFlightRecord};
use crate::broker::SourceRecord;
use crate::dead_letter::{DeadLetterEntry, DeadLetterSink, FailureKind, OriginalEvent};
use crate::gateway::{PredictorError, PredictorGateway};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Result handed off; offset may be committed
    Committed,
    /// Entry recorded in the dead-letter sink; offset may be committed
    DeadLettered(FailureKind),
    /// Gave up without a terminal record; offset must stay uncommitted
    Abandoned,
}

impl Outcome {
    pub fn is_complete(self) -> bool {
        !matches!(self, Outcome::Abandoned)
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Committed => "committed",
            Outcome::DeadLettered(_) => "dead_lettered",
            Outcome::Abandoned => "abandoned",
        }
    }
}

pub struct EventProcessor {
    gateway: Arc<PredictorGateway>,
    results: Arc<dyn ResultSink>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry: RetryConfig,
    attempt_timeout: Duration,
}

impl EventProcessor {
    pub fn new(
        gateway: Arc<PredictorGateway>,
        results: Arc<dyn ResultSink>,
        dead_letters: Arc<dyn DeadLetterSink>,
        retry: RetryConfig,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            results,
            dead_letters,
            retry,
            attempt_timeout,
        }
    }

    pub async fn process(&self, record: &SourceRecord, shutdown: watch::Receiver<bool>) -> Outcome {
        let mut in_flight = InFlightRecord::received(record);

        let outcome = match event_schema::decode(&record.payload) {
            Ok(event) => {
                in_flight.event_id = event.event_id.clone();
                self.drive(record, event, &mut in_flight, shutdown).await
            }
            Err(e) => {
                let kind = match e {
                    DecodeError::UnsupportedVersion { .. } => FailureKind::UnsupportedVersion,
                    _ => FailureKind::Decode,
                };
                let entry = DeadLetterEntry::new(
                    record,
                    OriginalEvent::Raw(record.payload.clone()),
                    in_flight.event_id.clone(),
                    kind,
                    e.to_string(),
                    in_flight.attempt_count,
                    Utc::now(),
                );
                self.dead_letter(entry, &mut in_flight, shutdown).await
            }
        };

        metrics::EVENTS_PROCESSED
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    async fn drive(
        &self,
        record: &SourceRecord,
        event: ListingEvent,
        in_flight: &mut InFlightRecord,
        shutdown: watch::Receiver<bool>,
    ) -> Outcome {
        let ceiling = self.retry.max_attempts.max(1);
        let mut backoff = Backoff::new(&self.retry);
        let mut first_failed_at: Option<DateTime<Utc>> = None;

        loop {
            in_flight.begin_attempt(self.attempt_timeout);
            let deadline = in_flight.deadline;

            // a panic is a defect in this event's handling, never worth retrying
            let attempt = AssertUnwindSafe(self.attempt(&event, in_flight))
                .catch_unwind()
                .map(|caught| {
                    caught.unwrap_or_else(|panic| {
                        Err(PredictorError::Permanent(format!(
                            "Attempt panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    })
                });

            let error = match with_deadline(deadline, attempt).await {
                Ok(()) => {
                    in_flight.transition(EventState::Committed);
                    debug!(
                        event_id = %in_flight.event_id,
                        partition = in_flight.partition,
                        offset = in_flight.offset,
                        attempts = in_flight.attempt_count + 1,
                        "Event processed"
                    );
                    return Outcome::Committed;
                }
                Err(TimeoutError::OperationFailed(e)) => e,
                Err(_) => PredictorError::Transient(format!(
                    "Attempt deadline of {:?} exceeded",
                    self.attempt_timeout
                )),
            };

            let failed_at = *first_failed_at.get_or_insert_with(Utc::now);
            let attempts = in_flight.record_failure();

            let kind = match &error {
                PredictorError::Validation(_) => Some(FailureKind::Validation),
                PredictorError::Permanent(_) => Some(FailureKind::Permanent),
                PredictorError::Transient(_) if attempts >= ceiling => Some(FailureKind::Transient),
                PredictorError::Transient(_) => None,
            };

            if let Some(kind) = kind {
                let entry = DeadLetterEntry::new(
                    record,
                    OriginalEvent::Decoded(event.clone()),
                    event.event_id.clone(),
                    kind,
                    error.to_string(),
                    attempts,
                    failed_at,
                );
                return self.dead_letter(entry, in_flight, shutdown).await;
            }

            debug_assert!(error.is_retryable());
            in_flight.transition(EventState::Retrying);
            let delay = backoff.next_delay();
            warn!(
                event_id = %in_flight.event_id,
                attempt = attempts,
                max_attempts = ceiling,
                error = %error,
                "Attempt failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        event: &ListingEvent,
        in_flight: &mut InFlightRecord,
    ) -> Result<(), PredictorError> {
        self.gateway.validate(event)?;
        in_flight.transition(EventState::Predicting);

        let result = self.gateway.predict_valid(event).await?;

        self.results.deliver(&result).await.map_err(|e| match e {
            HandoffError::Encode(_) | HandoffError::Rejected(_) => {
                PredictorError::Permanent(e.to_string())
            }
            HandoffError::Unavailable(_) => {
                PredictorError::Transient(format!("Result hand-off failed: {}", e))
            }
        })
    }

    /// Records the entry, retrying the sink until it succeeds or shutdown begins
    async fn dead_letter(
        &self,
        entry: DeadLetterEntry,
        in_flight: &mut InFlightRecord,
        mut shutdown: watch::Receiver<bool>,
    ) -> Outcome {
        let mut backoff = Backoff::new(&self.retry);

        loop {
            match self.dead_letters.record(&entry).await {
                Ok(()) => {
                    in_flight.transition(EventState::DeadLettered);
                    metrics::DEAD_LETTERS
                        .with_label_values(&[entry.error_kind.as_str()])
                        .inc();
                    warn!(
                        event_id = %entry.event_id,
                        partition = entry.partition,
                        offset = entry.offset,
                        kind = entry.error_kind.as_str(),
                        attempts = entry.attempt_count,
                        error = %entry.last_error,
                        "Event dead-lettered"
                    );
                    return Outcome::DeadLettered(entry.error_kind);
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        error!(
                            event_id = %entry.event_id,
                            error = %e,
                            "Dead-letter sink unavailable at shutdown, leaving offset uncommitted"
                        );
                        return Outcome::Abandoned;
                    }

                    let delay = backoff.next_delay();
                    error!(
                        event_id = %entry.event_id,
                        error = %e,
                        "Failed to record dead-letter entry, retrying in {:?}",
                        delay
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                tokio::time::sleep(delay).await;
                            } else {
                                info!(event_id = %entry.event_id, "Shutdown during dead-letter retry");
                            }
                        }
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
