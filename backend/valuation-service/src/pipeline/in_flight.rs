use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::broker::SourceRecord;

/// Per-event processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Received,
    Validating,
    Predicting,
    Retrying,
    Committed,
    DeadLettered,
}

impl EventState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventState::Committed | EventState::DeadLettered)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventState::Received => "received",
            EventState::Validating => "validating",
            EventState::Predicting => "predicting",
            EventState::Retrying => "retrying",
            EventState::Committed => "committed",
            EventState::DeadLettered => "dead_lettered",
        };
        f.write_str(name)
    }
}

/// One event currently owned by a worker.
///
/// `attempt_count` counts failed attempts, so it equals the retry ceiling
/// when an event is dead-lettered for exhausting it.
#[derive(Debug, Clone)]
pub struct InFlightRecord {
    pub event_id: String,
    pub partition: i32,
    pub offset: i64,
    pub attempt_count: u32,
    /// Instant by which the current attempt must finish
    pub deadline: Instant,
    pub state: EventState,
}

impl InFlightRecord {
    pub fn received(record: &SourceRecord) -> Self {
        Self {
            event_id: record.coordinates(),
            partition: record.partition,
            offset: record.offset,
            attempt_count: 0,
            deadline: Instant::now(),
            state: EventState::Received,
        }
    }

    pub fn begin_attempt(&mut self, timeout: Duration) {
        self.deadline = Instant::now() + timeout;
        self.transition(EventState::Validating);
    }

    pub fn transition(&mut self, next: EventState) {
        debug_assert!(!self.state.is_terminal(), "{} is terminal", self.state);
        self.state = next;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }
}
