//! In-order offset commit tracking
//!
//! Records finish out of order, but a partition's committed position may only
//! move over a contiguous run of finished offsets. Otherwise a crash could skip
//! an event that was still in flight behind a later, finished one.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct PartitionOffsets {
    /// Next offset to commit; `None` until the first record is seen
    committed: Option<i64>,
    /// Tracked offsets and whether they finished
    pending: BTreeMap<i64, bool>,
}

#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an offset; `false` for redeliveries already committed or in flight
    pub fn track(&mut self, partition: i32, offset: i64) -> bool {
        let state = self.partitions.entry(partition).or_default();

        if state.committed.is_some_and(|next| offset < next) {
            return false;
        }
        if state.pending.contains_key(&offset) {
            return false;
        }

        if state.committed.is_none() && state.pending.is_empty() {
            state.committed = Some(offset);
        }
        state.pending.insert(offset, false);
        true
    }

    /// Mark an offset finished; returns the new commit position if it advanced
    pub fn complete(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&partition)?;
        *state.pending.get_mut(&offset)? = true;

        let mut next = state.committed?;
        let start = next;

        while let Some(entry) = state.pending.first_entry() {
            if !*entry.get() {
                break;
            }
            // the first pending offset may sit above `next` after a gap in the log
            next = *entry.key() + 1;
            entry.remove();
        }

        if next > start {
            state.committed = Some(next);
            Some(next)
        } else {
            None
        }
    }

    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.partitions.get(&partition).and_then(|s| s.committed)
    }

    /// Offsets tracked but not yet committable
    pub fn pending(&self) -> usize {
        self.partitions.values().map(|s| s.pending.len()).sum()
    }
}
