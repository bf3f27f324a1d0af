use crate::request::{Request, SchedData};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Fixed-capacity pool of per-request scheduling metadata.
///
/// Acquire and release are wait-free. When the pool is empty the request
/// simply goes without metadata and is dispatched as pass-through.
pub struct MetadataPool {
    slots: ArrayQueue<SchedData>,
    exhausted: AtomicU64,
}

impl MetadataPool {
    pub fn new(capacity: usize) -> Self {
        let slots = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = slots.push(SchedData::default());
        }
        Self {
            slots,
            exhausted: AtomicU64::new(0),
        }
    }

    /// Attach a zeroed metadata record to `request`.
    ///
    /// Returns false if the pool is exhausted. A request that already
    /// carries metadata keeps it.
    pub fn prepare(&self, request: &mut Request) -> bool {
        if request.sched.is_some() {
            return true;
        }
        match self.slots.pop() {
            Some(mut data) => {
                data.deadline = 0;
                data.predicted_latency = 0;
                data.block_size = request.size;
                data.charged = false;
                request.sched = Some(data);
                true
            }
            None => {
                let misses = self.exhausted.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    request = %request.id,
                    misses,
                    "metadata pool exhausted, request will bypass deadline scheduling"
                );
                false
            }
        }
    }

    /// Detach and return the request's metadata, if any.
    pub fn release(&self, request: &mut Request) {
        if let Some(data) = request.sched.take() {
            let _ = self.slots.push(data);
        }
    }

    pub fn available(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of failed acquisitions since construction.
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }
}
