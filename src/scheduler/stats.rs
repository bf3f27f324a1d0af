use crate::request::{ClassTable, OpClass};
use serde::Serialize;
use std::fmt;

/// Counters guarded by the scheduler lock. They may wrap; only differences
/// between them are meaningful.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub inserted: u64,
    pub merged: u64,
    pub dispatched: u64,
    pub batch_size_highest: ClassTable<u64>,
}

impl Counters {
    pub fn record_fill(&mut self, per_class: &ClassTable<u64>) {
        for class in OpClass::ALL {
            let highest = &mut self.batch_size_highest[class];
            *highest = (*highest).max(per_class[class]);
        }
    }

    pub fn reset_batch_stats(&mut self) {
        self.batch_size_highest = ClassTable::default();
    }
}

/// Point-in-time view of the scheduler's counters and queues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub inserted: u64,
    pub merged: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub batch_size_highest: ClassTable<u64>,
    pub in_flight_latency_ns: u64,
    pub pending_deadline: usize,
    pub pending_batches: usize,
    pub pending_priority: usize,
    pub metadata_available: usize,
    pub metadata_exhausted: u64,
}

impl SchedulerStats {
    /// Requests admitted but not yet completed.
    pub fn queued(&self) -> u64 {
        self.inserted.wrapping_sub(self.completed)
    }

    /// Requests held inside the scheduler, excluding those already dispatched.
    pub fn pending(&self) -> usize {
        self.pending_deadline + self.pending_batches + self.pending_priority
    }
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "inserted {} merged {} dispatched {} completed {}",
            self.inserted, self.merged, self.dispatched, self.completed
        )?;
        writeln!(
            f,
            "pending: deadline {} batches {} priority {}",
            self.pending_deadline, self.pending_batches, self.pending_priority
        )?;
        writeln!(f, "in-flight latency: {} ns", self.in_flight_latency_ns)?;
        write!(
            f,
            "highest batch: Read {} Write {} Discard {} Other {}",
            self.batch_size_highest[OpClass::Read],
            self.batch_size_highest[OpClass::Write],
            self.batch_size_highest[OpClass::Discard],
            self.batch_size_highest[OpClass::Other]
        )
    }
}
