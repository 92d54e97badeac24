//! Consumer loop
//!
//! Pulls records from the [`EventSource`], fans them out to workers and commits
//! offsets once work is safely finished.
//!
//! - At most `max_in_flight` records are held at once. Each pull only asks for
//!   the free capacity and pulling pauses at zero.
//! - At most `workers` records execute concurrently (semaphore).
//! - Records sharing a key form a lane and run one at a time in broker order.
//! - Commits go through [`OffsetTracker`], so a partition never commits past
//!   a record that is still in flight.

pub mod handoff;
pub mod in_flight;
pub mod offsets;
pub mod worker;

use futures::FutureExt;
use resilience::{Backoff, RetryConfig};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{EventSource, SourceRecord};
use crate::metrics;
pub use handoff::{HandoffError, LogResultSink, MemoryResultSink, ResultSink, TopicResultSink};
pub use in_flight::{EventState, InFlightRecord};
pub use offsets::OffsetTracker;
pub use worker::{EventProcessor, Outcome};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Records executing concurrently
    pub workers: usize,
    /// Records held (queued in lanes or executing) at once
    pub max_in_flight: usize,
    pub poll_batch: usize,
    pub poll_timeout: Duration,
    /// Attempt ceiling and backoff for event retries
    pub retry: RetryConfig,
    /// Bound on a single validate + predict + hand-off attempt
    pub attempt_timeout: Duration,
    pub shutdown_deadline: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_in_flight: 256,
            poll_batch: 64,
            poll_timeout: Duration::from_millis(500),
            retry: RetryConfig::default(),
            attempt_timeout: Duration::from_secs(10),
            shutdown_deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    /// Redeliveries of offsets already committed or in flight
    pub duplicates: u64,
    pub committed: u64,
    pub dead_lettered: u64,
    pub abandoned: u64,
    /// Records still executing when the shutdown deadline hit
    pub aborted: u64,
    /// Records queued in lanes, never started, at shutdown
    pub dropped_at_shutdown: u64,
    pub offset_commits: u64,
}

struct TaskDone {
    lane: String,
    partition: i32,
    offset: i64,
    outcome: Outcome,
}

#[derive(Default)]
struct LoopState {
    tracker: OffsetTracker,
    /// Present while a lane has a running task; holds records waiting behind it
    lanes: HashMap<String, VecDeque<SourceRecord>>,
    /// Abandoned records keep their slot until restart: their partition
    /// cannot commit past them, so admitting more would only grow the tracker
    held: usize,
    /// Commit positions not yet accepted by the broker
    pending_commits: BTreeMap<i32, i64>,
    stats: ConsumerStats,
}

pub struct ConsumerLoop {
    source: Arc<dyn EventSource>,
    processor: Arc<EventProcessor>,
    permits: Arc<Semaphore>,
    config: ConsumerConfig,
}

impl ConsumerLoop {
    pub fn new(
        source: Arc<dyn EventSource>,
        processor: Arc<EventProcessor>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            source,
            processor,
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ConsumerStats {
        let mut state = LoopState::default();
        let mut tasks: JoinSet<TaskDone> = JoinSet::new();
        let mut poll_backoff = Backoff::new(&self.config.retry);
        let mut paused_until: Option<Instant> = None;

        info!(
            workers = self.config.workers,
            max_in_flight = self.config.max_in_flight,
            max_attempts = self.config.retry.max_attempts,
            "Starting consumer loop"
        );

        loop {
            while let Some(Some(joined)) = tasks.join_next().now_or_never() {
                self.on_joined(joined, &mut state, &mut tasks, &shutdown).await;
            }

            if *shutdown.borrow() {
                break;
            }

            if !state.pending_commits.is_empty() {
                self.flush_commits(&mut state).await;
            }

            let capacity = self.config.max_in_flight.saturating_sub(state.held);
            let paused = paused_until.is_some_and(|until| Instant::now() < until);

            if capacity == 0 || paused {
                let wake = paused_until
                    .filter(|_| paused)
                    .unwrap_or_else(|| Instant::now() + self.config.poll_timeout);

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    Some(joined) = tasks.join_next() => {
                        self.on_joined(joined, &mut state, &mut tasks, &shutdown).await;
                    }
                    _ = tokio::time::sleep_until(wake) => {}
                }
                continue;
            }

            let max = capacity.min(self.config.poll_batch.max(1));
            match self.source.poll(max, self.config.poll_timeout).await {
                Ok(records) => {
                    poll_backoff.reset(&self.config.retry);
                    paused_until = None;

                    for record in records {
                        self.admit(record, &mut state, &mut tasks, &shutdown);
                    }
                }
                Err(e) => {
                    let delay = poll_backoff.next_delay();
                    error!(error = %e, "Broker poll failed, pausing for {:?}", delay);
                    paused_until = Some(Instant::now() + delay);
                }
            }
        }

        self.drain(state, tasks, &shutdown).await
    }

    fn admit(
        &self,
        record: SourceRecord,
        state: &mut LoopState,
        tasks: &mut JoinSet<TaskDone>,
        shutdown: &watch::Receiver<bool>,
    ) {
        if !state.tracker.track(record.partition, record.offset) {
            state.stats.duplicates += 1;
            debug!(
                partition = record.partition,
                offset = record.offset,
                "Skipping redelivered record"
            );
            return;
        }

        state.held += 1;
        state.stats.received += 1;
        metrics::IN_FLIGHT.set(state.held as i64);

        let lane = lane_key(&record);
        match state.lanes.get_mut(&lane) {
            Some(queue) => queue.push_back(record),
            None => {
                state.lanes.insert(lane.clone(), VecDeque::new());
                self.spawn(tasks, lane, record, shutdown);
            }
        }
    }

    fn spawn(
        &self,
        tasks: &mut JoinSet<TaskDone>,
        lane: String,
        record: SourceRecord,
        shutdown: &watch::Receiver<bool>,
    ) {
        let processor = Arc::clone(&self.processor);
        let permits = Arc::clone(&self.permits);
        let shutdown = shutdown.clone();

        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();

            let outcome = AssertUnwindSafe(processor.process(&record, shutdown))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!(
                        partition = record.partition,
                        offset = record.offset,
                        "Worker panicked outside an attempt, leaving offset uncommitted"
                    );
                    Outcome::Abandoned
                });

            TaskDone {
                lane,
                partition: record.partition,
                offset: record.offset,
                outcome,
            }
        });
    }

    async fn on_joined(
        &self,
        joined: Result<TaskDone, JoinError>,
        state: &mut LoopState,
        tasks: &mut JoinSet<TaskDone>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let done = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "Worker task failed");
                return;
            }
        };

        if done.outcome.is_complete() {
            state.held = state.held.saturating_sub(1);
            metrics::IN_FLIGHT.set(state.held as i64);
        }

        match done.outcome {
            Outcome::Committed => state.stats.committed += 1,
            Outcome::DeadLettered(_) => state.stats.dead_lettered += 1,
            Outcome::Abandoned => state.stats.abandoned += 1,
        }

        if done.outcome.is_complete() {
            if let Some(next) = state.tracker.complete(done.partition, done.offset) {
                state.pending_commits.insert(done.partition, next);
            }
            self.flush_commits(state).await;
        }

        match state.lanes.get_mut(&done.lane).and_then(VecDeque::pop_front) {
            Some(record) => self.spawn(tasks, done.lane, record, shutdown),
            None => {
                state.lanes.remove(&done.lane);
            }
        }
    }

    async fn flush_commits(&self, state: &mut LoopState) {
        for (partition, next_offset) in std::mem::take(&mut state.pending_commits) {
            match self.source.commit(partition, next_offset).await {
                Ok(()) => {
                    state.stats.offset_commits += 1;
                    metrics::OFFSET_COMMITS.with_label_values(&["ok"]).inc();
                    debug!(partition, next_offset, "Offset committed");
                }
                Err(e) => {
                    metrics::OFFSET_COMMITS.with_label_values(&["failed"]).inc();
                    warn!(partition, next_offset, error = %e, "Offset commit failed, will retry");
                    state.pending_commits.insert(partition, next_offset);
                }
            }
        }
    }

    /// Stop pulling, let running work finish until the deadline, commit what completed
    async fn drain(
        &self,
        mut state: LoopState,
        mut tasks: JoinSet<TaskDone>,
        shutdown: &watch::Receiver<bool>,
    ) -> ConsumerStats {
        let queued: usize = state.lanes.values().map(VecDeque::len).sum();
        for queue in state.lanes.values_mut() {
            queue.clear();
        }
        state.held = state.held.saturating_sub(queued);
        state.stats.dropped_at_shutdown = queued as u64;

        info!(
            running = tasks.len(),
            queued,
            "Shutdown requested, draining in-flight events"
        );

        let deadline = Instant::now() + self.config.shutdown_deadline;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => {
                    self.on_joined(joined, &mut state, &mut tasks, shutdown).await;
                }
                Ok(None) => break,
                Err(_) => {
                    let remaining = tasks.len();
                    warn!(remaining, "Shutdown deadline reached, aborting remaining events");
                    state.stats.aborted = remaining as u64;
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        if !state.pending_commits.is_empty() {
            self.flush_commits(&mut state).await;
        }
        if !state.pending_commits.is_empty() {
            error!(
                partitions = state.pending_commits.len(),
                "Exiting with uncommitted offsets, records will be redelivered"
            );
        }

        metrics::IN_FLIGHT.set(0);
        info!(
            received = state.stats.received,
            committed = state.stats.committed,
            dead_lettered = state.stats.dead_lettered,
            abandoned = state.stats.abandoned,
            aborted = state.stats.aborted,
            "Consumer loop stopped"
        );

        state.stats
    }
}

fn lane_key(record: &SourceRecord) -> String {
    match &record.key {
        Some(key) => format!("{}/{}", record.partition, key),
        None => format!("{}/", record.partition),
    }
}
