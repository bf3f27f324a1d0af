//! Adaptive deadline scheduler.
//!
//! Requests are stamped with a predicted latency and a deadline on arrival
//! and kept in a [`DeadlineIndex`]. Dispatch drains the active batch page in
//! strict class order; pages are refilled from the index in deadline order
//! under a per-class batch limit and a global in-flight latency window.
//! Completions feed the per-class [`LatencyModel`]s, which recalibrate on a
//! timer armed by the completions themselves.
//!
//! Lock order: scheduler state, then a model's parameter lock, then its
//! histogram lock. Completion never takes the scheduler lock.

pub mod batch;
pub mod deadline_index;
pub mod pool;
pub mod priority_lane;
pub mod stats;
pub mod timer;

pub use batch::{BatchPagesSnapshot, PageSnapshot, QueuedRequest};
pub use stats::SchedulerStats;
pub use timer::{RecalibrationTimer, RecalibrationWorker};

use crate::clock::{Clock, MonotonicClock};
use crate::config::{SchedulerConfig, Tunables};
use crate::error::{Error, Rejected, Result};
use crate::latency_model::{LatencyModel, ModelSnapshot};
use crate::request::{ClassTable, OpClass, Request, RequestId};
use batch::{BatchPages, FillContext};
use deadline_index::DeadlineIndex;
use parking_lot::Mutex;
use pool::MetadataPool;
use priority_lane::PriorityLane;
use stats::Counters;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, trace};

#[derive(Debug, Default)]
struct SchedState {
    index: DeadlineIndex,
    lane: PriorityLane,
    batches: BatchPages,
    counters: Counters,
}

pub struct Scheduler {
    state: Mutex<SchedState>,
    models: ClassTable<LatencyModel>,
    tunables: Tunables,
    /// Predicted latency of every request admitted to a batch page and not
    /// yet completed.
    in_flight: AtomicU64,
    completed: AtomicU64,
    pool: MetadataPool,
    timer: RecalibrationTimer,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let tunables = Tunables::new(&config)?;
        let now = clock.now_ns();
        info!(
            window_ns = config.global_latency_window_ns,
            refill_ratio = config.refill_ratio_percent,
            pool = config.metadata_pool_capacity,
            "adaptive deadline scheduler initialised"
        );
        Ok(Self {
            state: Mutex::new(SchedState::default()),
            models: ClassTable::from_fn(|_| LatencyModel::new(now)),
            pool: MetadataPool::new(tunables.metadata_pool_capacity()),
            tunables,
            in_flight: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            timer: RecalibrationTimer::new(),
            clock,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    fn fill_context(&self) -> FillContext<'_> {
        FillContext {
            tunables: &self.tunables,
            models: &self.models,
            in_flight: &self.in_flight,
        }
    }

    /// Attach pooled metadata to a request ahead of submission. Returns
    /// false when the pool is exhausted; the request will then be
    /// dispatched as pass-through.
    pub fn prepare_request(&self, request: &mut Request) -> bool {
        self.pool.prepare(request)
    }

    /// Admit a request. Arrival time and size must already be set. A refused
    /// request is returned inside the error with its metadata released.
    pub fn submit(&self, request: Request) -> std::result::Result<(), Rejected> {
        let mut state = self.state.lock();
        self.insert_locked(&mut state, request)
    }

    /// Admit several requests under a single lock acquisition. Every request
    /// is attempted; the refused ones are handed back in submission order.
    pub fn submit_batch(
        &self,
        requests: impl IntoIterator<Item = Request>,
    ) -> std::result::Result<(), Vec<Rejected>> {
        let mut state = self.state.lock();
        let rejected: Vec<Rejected> = requests
            .into_iter()
            .filter_map(|request| self.insert_locked(&mut state, request).err())
            .collect();
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(rejected)
        }
    }

    fn insert_locked(
        &self,
        state: &mut SchedState,
        mut request: Request,
    ) -> std::result::Result<(), Rejected> {
        let error = if state.index.contains(request.id) {
            Some(Error::DuplicateRequest(request.id))
        } else if state.batches.contains(request.id) {
            Some(Error::invariant(format!(
                "{} submitted while waiting on a batch page",
                request.id
            )))
        } else if state.lane.contains(request.id) {
            Some(Error::invariant(format!(
                "{} submitted while waiting in the priority lane",
                request.id
            )))
        } else {
            None
        };
        if let Some(error) = error {
            self.pool.release(&mut request);
            return Err(Rejected::new(error, request));
        }

        if !request.counted {
            request.counted = true;
            state.counters.inserted = state.counters.inserted.wrapping_add(1);
        }

        if !self.pool.prepare(&mut request) {
            trace!(request = %request.id, "pass-through insert");
            state.lane.push_back(request);
            return Ok(());
        }

        self.stamp(&mut request);
        trace!(
            request = %request.id,
            class = %request.op,
            deadline = request.deadline().unwrap_or(0),
            "insert"
        );
        state.index.insert(request).map_err(|rq| {
            let error = Error::invariant(format!("{} could not be indexed", rq.id));
            Rejected::new(error, rq)
        })
    }

    /// Compute predicted latency and deadline from the current model.
    fn stamp(&self, request: &mut Request) {
        let predicted = self.models[request.op].predict(request.size);
        let deadline = request
            .arrival_ns
            .saturating_add(self.tunables.latency_target(request.op))
            .saturating_add(predicted);
        if let Some(data) = request.sched.as_mut() {
            data.block_size = request.size;
            data.predicted_latency = predicted;
            data.deadline = deadline;
        }
    }

    /// Re-admit a previously started request ahead of everything else.
    pub fn requeue(&self, mut request: Request) -> std::result::Result<(), Rejected> {
        let mut state = self.state.lock();
        if state.index.contains(request.id)
            || state.batches.contains(request.id)
            || state.lane.contains(request.id)
        {
            let error = Error::invariant(format!(
                "{} requeued while still queued for dispatch",
                request.id
            ));
            return Err(Rejected::new(error, request));
        }
        if !request.counted {
            request.counted = true;
            state.counters.inserted = state.counters.inserted.wrapping_add(1);
        }
        request.start_ns = None;
        trace!(request = %request.id, "requeue at head");
        state.lane.push_front(request);
        Ok(())
    }

    /// Next request to issue to the device, or `None` if there is no work.
    pub fn next(&self) -> Option<Request> {
        let mut state = self.state.lock();
        if let Some(request) = state.lane.pop_front() {
            trace!(request = %request.id, "dispatch from priority lane");
            return Some(request);
        }
        let ctx = self.fill_context();
        let SchedState {
            index,
            batches,
            counters,
            ..
        } = &mut *state;
        batches.dispatch(index, &ctx, counters)
    }

    /// Fill the inactive batch page now, if it is not already holding a fill.
    /// Returns the number of requests admitted.
    pub fn fill(&self) -> usize {
        let mut state = self.state.lock();
        let ctx = self.fill_context();
        let SchedState {
            index,
            batches,
            counters,
            ..
        } = &mut *state;
        if batches.more_ready() {
            return 0;
        }
        let in_flight = self.in_flight.load(Ordering::Acquire);
        batches.fill(index, &ctx, counters, in_flight)
    }

    /// Account for a finished request and release its metadata.
    pub fn complete(&self, request: &mut Request, completion_ns: u64) {
        if let Some(data) = request.sched {
            if data.charged {
                self.discharge(request.id, data.predicted_latency);
            }
            if let Some(start) = request.start_ns {
                if data.block_size > 0 {
                    let measured = completion_ns.saturating_sub(start);
                    self.models[request.op].observe(
                        data.block_size,
                        measured,
                        data.predicted_latency,
                        completion_ns,
                    );
                    self.timer
                        .arm(completion_ns, self.tunables.recalibration_delay_ns());
                }
            }
        }
        self.finish(request);
    }

    fn finish(&self, request: &mut Request) {
        self.pool.release(request);
        if request.counted {
            request.counted = false;
            self.completed.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn discharge(&self, id: RequestId, latency: u64) {
        let result = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(latency));
        if let Err(current) = result {
            self.in_flight.fetch_sub(current.min(latency), Ordering::AcqRel);
            error!(
                request = %id,
                latency,
                in_flight = current,
                "in-flight predicted latency would go negative"
            );
        }
    }

    /// Re-stamp an indexed request whose size changed (front merge).
    pub fn reposition(&self, id: RequestId, new_size: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.reposition_locked(&mut state, id, new_size, None)
    }

    /// Re-stamp an indexed request. `arrival_ns` only ever moves the
    /// request's arrival earlier.
    fn reposition_locked(
        &self,
        state: &mut SchedState,
        id: RequestId,
        new_size: u64,
        arrival_ns: Option<u64>,
    ) -> Result<()> {
        let mut request = state.index.remove(id).ok_or(Error::RequestNotFound(id))?;
        request.size = new_size;
        if let Some(arrival) = arrival_ns {
            request.arrival_ns = request.arrival_ns.min(arrival);
        }
        self.stamp(&mut request);
        state
            .index
            .insert(request)
            .map_err(|rq| Error::invariant(format!("{} lost during reposition", rq.id)))
    }

    /// `absorbed` has been coalesced into `survivor`, which now spans
    /// `merged_size` bytes. The survivor inherits the earlier of the two
    /// arrival times and is repositioned; the absorbed request is finished
    /// and handed back to the host.
    pub fn merge_notify(
        &self,
        survivor: RequestId,
        absorbed: RequestId,
        merged_size: u64,
    ) -> Result<Request> {
        if survivor == absorbed {
            return Err(Error::invariant(format!("{} merged into itself", survivor)));
        }

        let mut state = self.state.lock();
        if !state.index.contains(survivor) {
            return Err(Error::RequestNotFound(survivor));
        }

        let mut gone = match state.index.remove(absorbed) {
            Some(request) => request,
            None => state
                .batches
                .remove(absorbed)
                .ok_or(Error::RequestNotFound(absorbed))?,
        };
        self.reposition_locked(&mut state, survivor, merged_size, Some(gone.arrival_ns))?;
        state.counters.merged = state.counters.merged.wrapping_add(1);
        drop(state);

        if let Some(data) = gone.sched {
            if data.charged {
                self.discharge(gone.id, data.predicted_latency);
            }
        }
        self.finish(&mut gone);
        trace!(%survivor, %absorbed, merged_size, "requests merged");
        Ok(gone)
    }

    pub fn has_work(&self) -> bool {
        let state = self.state.lock();
        !state.lane.is_empty() || !state.index.is_empty() || !state.batches.is_empty()
    }

    /// Requests admitted and not yet completed.
    pub fn queued(&self) -> u64 {
        let inserted = self.state.lock().counters.inserted;
        inserted.wrapping_sub(self.completed.load(Ordering::Acquire))
    }

    /// Recalibrate every model if the recalibration timer has expired.
    pub fn tick(&self, now_ns: u64) -> bool {
        if !self.timer.poll(now_ns) {
            return false;
        }
        self.recalibrate_all(now_ns);
        true
    }

    pub fn recalibrate_all(&self, now_ns: u64) {
        for model in &self.models.0 {
            model.recalibrate(now_ns);
        }
    }

    pub fn recalibration_due_at(&self) -> Option<u64> {
        self.timer.expires_at()
    }

    // Configuration surface.

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn config(&self) -> SchedulerConfig {
        self.tunables.snapshot()
    }

    /// Set a class latency target. The class model re-bootstraps.
    pub fn set_latency_target(&self, class: OpClass, nsec: u64) {
        self.models[class].clear_base();
        self.tunables.store_latency_target(class, nsec);
        info!(%class, nsec, "latency target updated");
    }

    pub fn set_batch_limit(&self, class: OpClass, limit: u32) -> Result<()> {
        self.tunables.set_batch_limit(class, limit)?;
        info!(%class, limit, "batch limit updated");
        Ok(())
    }

    pub fn set_global_latency_window(&self, nsec: u64) {
        self.tunables.set_global_latency_window(nsec);
        info!(nsec, "global latency window updated");
    }

    pub fn set_refill_ratio(&self, percent: u32) -> Result<()> {
        self.tunables.set_refill_ratio(percent)?;
        info!(percent, "refill ratio updated");
        Ok(())
    }

    pub fn set_recalibration_delay_ms(&self, msec: u64) {
        self.tunables.set_recalibration_delay_ms(msec);
    }

    pub fn reset_latency_model(&self, class: OpClass) {
        self.models[class].reset();
        info!(%class, "latency model reset");
    }

    pub fn reset_all_latency_models(&self) {
        for class in OpClass::ALL {
            self.reset_latency_model(class);
        }
    }

    pub fn reset_batch_stats(&self) {
        self.state.lock().counters.reset_batch_stats();
    }

    // Introspection surface.

    pub fn model(&self, class: OpClass) -> &LatencyModel {
        &self.models[class]
    }

    pub fn model_snapshot(&self, class: OpClass) -> ModelSnapshot {
        self.models[class].snapshot()
    }

    pub fn in_flight_latency(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn batch_pages(&self) -> BatchPagesSnapshot {
        self.state.lock().batches.snapshot()
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            inserted: state.counters.inserted,
            merged: state.counters.merged,
            dispatched: state.counters.dispatched,
            completed: self.completed.load(Ordering::Acquire),
            batch_size_highest: state.counters.batch_size_highest,
            in_flight_latency_ns: self.in_flight.load(Ordering::Acquire),
            pending_deadline: state.index.len(),
            pending_batches: state.batches.len(),
            pending_priority: state.lane.len(),
            metadata_available: self.pool.available(),
            metadata_exhausted: self.pool.exhausted_count(),
        }
    }

    /// Fails if any admitted request has not completed.
    pub fn check_quiescent(&self) -> Result<()> {
        let stats = self.stats();
        if stats.queued() != 0 || stats.pending() != 0 {
            return Err(Error::invariant(format!(
                "{} requests outstanding: i {} m {} d {} c {}",
                stats.queued(),
                stats.inserted,
                stats.merged,
                stats.dispatched,
                stats.completed
            )));
        }
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.lane.is_empty() {
            error!(pending = state.lane.len(), "priority lane not empty at shutdown");
        }
        let completed = self.completed.load(Ordering::Acquire);
        let queued = state.counters.inserted.wrapping_sub(completed);
        if queued != 0 {
            error!(
                queued,
                inserted = state.counters.inserted,
                merged = state.counters.merged,
                dispatched = state.counters.dispatched,
                completed,
                "scheduler dropped with outstanding requests"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const MS: u64 = 1_000_000;

    fn scheduler(config: SchedulerConfig) -> (Scheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let sched = Scheduler::with_clock(config, clock.clone()).unwrap();
        (sched, clock)
    }

    /// Run one request of `class` through the scheduler so its model has a base.
    fn warm_up(sched: &Scheduler, id: u64, class: OpClass, latency: u64) {
        sched.submit(Request::new(id, class, 4096, 0)).unwrap();
        let mut rq = sched.next().unwrap();
        rq.mark_started(0);
        sched.complete(&mut rq, latency);
    }

    #[test]
    fn test_submit_stamps_deadline() {
        let mut config = SchedulerConfig::default();
        config.latency_target_ns[OpClass::Read] = 2 * MS;
        let (sched, _) = scheduler(config);
        warm_up(&sched, 1, OpClass::Read, 100_000);
        assert_eq!(sched.model_snapshot(OpClass::Read).base, 100_000);

        sched.submit(Request::new(2, OpClass::Read, 4096, 5 * MS)).unwrap();
        let rq = sched.next().unwrap();
        assert_eq!(rq.predicted_latency(), Some(100_000));
        assert_eq!(rq.deadline(), Some(5 * MS + 2 * MS + 100_000));
    }

    #[test]
    fn test_write_scenario_two_of_three() {
        let mut config = SchedulerConfig::default();
        config.batch_limit[OpClass::Write] = 2;
        config.global_latency_window_ns = 1_000_000;
        config.latency_target_ns[OpClass::Write] = 0;
        let (sched, _) = scheduler(config);
        warm_up(&sched, 100, OpClass::Write, 400_000);

        // Equal arrival, equal size, so equal deadlines in order A, B, C.
        for id in 1..=3 {
            sched.submit(Request::new(id, OpClass::Write, 4096, 0)).unwrap();
        }
        assert_eq!(sched.fill(), 2);

        let pages = sched.batch_pages();
        let ids: Vec<u64> = pages.inactive().queues[OpClass::Write]
            .iter()
            .map(|q| q.id.0)
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(sched.in_flight_latency(), 800_000);
        assert_eq!(sched.stats().pending_deadline, 1);
    }

    #[test]
    fn test_priority_lane_bypasses_batches() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        sched.submit(Request::new(1, OpClass::Read, 4096, 0)).unwrap();
        let started = sched.next().unwrap();
        sched.submit(Request::new(2, OpClass::Read, 4096, 0)).unwrap();

        sched.requeue(started).unwrap();
        assert_eq!(sched.next().map(|r| r.id.0), Some(1));
        assert_eq!(sched.next().map(|r| r.id.0), Some(2));
        // Requeue does not count a second insertion.
        assert_eq!(sched.stats().inserted, 2);
    }

    #[test]
    fn test_requeue_of_indexed_request_is_invariant_violation() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        let rq = Request::new(1, OpClass::Read, 4096, 0);
        sched.submit(rq.clone()).unwrap();
        let rejected = sched.requeue(rq).unwrap_err();
        assert!(matches!(rejected.error, Error::InvariantViolation(_)));
        assert_eq!(rejected.request.id, RequestId(1));
    }

    #[test]
    fn test_duplicate_submit_rejected() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        sched.submit(Request::new(1, OpClass::Read, 4096, 0)).unwrap();
        let rejected = sched
            .submit(Request::new(1, OpClass::Read, 8192, 0).with_user_data(99))
            .unwrap_err();
        assert!(matches!(rejected.error, Error::DuplicateRequest(RequestId(1))));
        // The host gets its request back untouched and without metadata.
        let request = rejected.into_request();
        assert_eq!(request.size, 8192);
        assert_eq!(request.user_data, 99);
        assert!(request.sched_data().is_none());
        assert_eq!(sched.stats().inserted, 1);
        assert_eq!(sched.stats().metadata_available, 1023);
    }

    #[test]
    fn test_submit_of_request_on_batch_page_rejected() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        sched.submit(Request::new(7, OpClass::Read, 4096, 0)).unwrap();
        assert_eq!(sched.fill(), 1);

        let rejected = sched
            .submit(Request::new(7, OpClass::Read, 4096, 0))
            .unwrap_err();
        assert!(matches!(rejected.error, Error::InvariantViolation(_)));

        let stats = sched.stats();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.pending_deadline, 0);
        assert_eq!(stats.pending_batches, 1);
        assert_eq!(stats.metadata_available, 1023);

        let mut rq = sched.next().unwrap();
        assert_eq!(rq.id, RequestId(7));
        sched.complete(&mut rq, 0);
        assert!(sched.next().is_none());
        sched.check_quiescent().unwrap();
    }

    #[test]
    fn test_submit_of_request_in_priority_lane_rejected() {
        let mut config = SchedulerConfig::default();
        config.metadata_pool_capacity = 1;
        let (sched, _) = scheduler(config);
        sched.submit(Request::new(1, OpClass::Read, 4096, 0)).unwrap();
        sched.submit(Request::new(2, OpClass::Read, 4096, 0)).unwrap();
        assert_eq!(sched.stats().pending_priority, 1);

        let rejected = sched
            .submit(Request::new(2, OpClass::Read, 4096, 0))
            .unwrap_err();
        assert!(matches!(rejected.error, Error::InvariantViolation(_)));
        assert_eq!(sched.stats().inserted, 2);
    }

    #[test]
    fn test_pool_exhaustion_degrades_to_pass_through() {
        let mut config = SchedulerConfig::default();
        config.metadata_pool_capacity = 1;
        let (sched, _) = scheduler(config);

        sched.submit(Request::new(1, OpClass::Write, 4096, 0)).unwrap();
        sched.submit(Request::new(2, OpClass::Write, 4096, 0)).unwrap();
        let stats = sched.stats();
        assert_eq!(stats.pending_deadline, 1);
        assert_eq!(stats.pending_priority, 1);
        assert_eq!(stats.metadata_exhausted, 1);

        let mut first = sched.next().unwrap();
        assert_eq!(first.id, RequestId(2));
        assert!(first.sched_data().is_none());
        first.mark_started(0);
        sched.complete(&mut first, 10);
        assert_eq!(sched.model_snapshot(OpClass::Write), ModelSnapshot::default());

        let mut second = sched.next().unwrap();
        second.mark_started(0);
        sched.complete(&mut second, 10);
        sched.check_quiescent().unwrap();
    }

    #[test]
    fn test_completion_updates_model_and_in_flight() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        warm_up(&sched, 1, OpClass::Read, 50_000);
        assert_eq!(sched.in_flight_latency(), 0);

        sched.submit(Request::new(2, OpClass::Read, 4096, 0)).unwrap();
        let mut rq = sched.next().unwrap();
        assert_eq!(sched.in_flight_latency(), 50_000);
        rq.mark_started(1_000);
        sched.complete(&mut rq, 61_000);
        assert_eq!(sched.in_flight_latency(), 0);
        assert_eq!(sched.model(OpClass::Read).pending_samples(), (1, 0));
        // Still armed from the warm-up completion, which was earlier.
        assert_eq!(sched.recalibration_due_at(), Some(50_000 + 100 * MS));
        assert!(rq.sched_data().is_none());
    }

    #[test]
    fn test_tick_recalibrates_after_delay() {
        let (sched, clock) = scheduler(SchedulerConfig::default());
        warm_up(&sched, 1, OpClass::Read, 50_000);
        assert!(!sched.tick(clock.now_ns()));
        assert!(sched.tick(200 * MS));

        let start = 2_000 * MS;
        clock.set(start);
        for id in 2..102 {
            sched.submit(Request::new(id, OpClass::Read, 4096, start)).unwrap();
            let mut rq = sched.next().unwrap();
            rq.mark_started(start);
            sched.complete(&mut rq, start + 150_000);
        }

        assert!(!sched.tick(start + 50 * MS));
        assert!(sched.tick(start + 150_000 + 100 * MS));
        assert_eq!(sched.model(OpClass::Read).pending_samples(), (0, 0));
        // 99 of 100 samples survive the outlier cut: (50_000 + 99 * 150_000) / 100.
        assert_eq!(sched.model_snapshot(OpClass::Read).base, 149_000);
        assert!(!sched.tick(start + 500 * MS));
    }

    #[test]
    fn test_zero_size_completion_is_not_observed() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        sched.submit(Request::new(1, OpClass::Other, 0, 0)).unwrap();
        let mut rq = sched.next().unwrap();
        rq.mark_started(0);
        sched.complete(&mut rq, 1_000);
        assert!(!sched.model(OpClass::Other).is_bootstrapped());
        assert_eq!(sched.recalibration_due_at(), None);
    }

    #[test]
    fn test_merge_repositions_survivor_and_finishes_absorbed() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        warm_up(&sched, 1, OpClass::Write, 10_000);
        sched.model(OpClass::Write).observe(12 * 1024, 90_000, 10_000, 0);
        sched.model(OpClass::Write).recalibrate(0);
        let slope = sched.model_snapshot(OpClass::Write).slope;
        assert!(slope > 0);

        sched.submit(Request::new(2, OpClass::Write, 4096, 0)).unwrap();
        sched.submit(Request::new(3, OpClass::Write, 4096, 0)).unwrap();

        let absorbed = sched.merge_notify(RequestId(2), RequestId(3), 8192).unwrap();
        assert_eq!(absorbed.id, RequestId(3));
        assert!(absorbed.sched_data().is_none());

        let stats = sched.stats();
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.pending_deadline, 1);
        assert_eq!(stats.completed, 2);

        let survivor = sched.next().unwrap();
        assert_eq!(survivor.size, 8192);
        assert_eq!(survivor.predicted_latency(), Some(10_000 + 4 * slope));
    }

    #[test]
    fn test_merge_inherits_earlier_arrival() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        warm_up(&sched, 100, OpClass::Write, 100_000);

        sched.submit(Request::new(1, OpClass::Write, 4096, 1_000 * MS)).unwrap();
        sched.submit(Request::new(2, OpClass::Write, 4096, 0)).unwrap();
        sched.submit(Request::new(3, OpClass::Write, 4096, 500 * MS)).unwrap();

        let absorbed = sched.merge_notify(RequestId(1), RequestId(2), 8192).unwrap();
        assert_eq!(absorbed.id, RequestId(2));

        let survivor = sched.next().unwrap();
        assert_eq!(survivor.id, RequestId(1));
        assert_eq!(survivor.arrival_ns, 0);
        let target = sched.config().latency_target_ns[OpClass::Write];
        assert_eq!(survivor.deadline(), Some(target + 100_000));
        assert_eq!(sched.next().map(|r| r.id), Some(RequestId(3)));
    }

    #[test]
    fn test_merge_keeps_survivor_arrival_when_earlier() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        warm_up(&sched, 100, OpClass::Read, 100_000);

        sched.submit(Request::new(1, OpClass::Read, 4096, 10 * MS)).unwrap();
        sched.submit(Request::new(2, OpClass::Read, 4096, 20 * MS)).unwrap();
        sched.merge_notify(RequestId(1), RequestId(2), 8192).unwrap();

        let survivor = sched.next().unwrap();
        assert_eq!(survivor.arrival_ns, 10 * MS);
    }

    #[test]
    fn test_merge_unknown_request() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        sched.submit(Request::new(1, OpClass::Read, 4096, 0)).unwrap();
        assert!(matches!(
            sched.merge_notify(RequestId(1), RequestId(9), 8192),
            Err(Error::RequestNotFound(RequestId(9)))
        ));
        assert!(matches!(
            sched.merge_notify(RequestId(9), RequestId(1), 8192),
            Err(Error::RequestNotFound(RequestId(9)))
        ));
        assert!(sched.merge_notify(RequestId(1), RequestId(1), 8192).is_err());
        assert_eq!(sched.stats().pending_deadline, 1);
    }

    #[test]
    fn test_latency_target_change_rebootstraps_model() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        warm_up(&sched, 1, OpClass::Read, 50_000);
        assert!(sched.model(OpClass::Read).is_bootstrapped());
        sched.set_latency_target(OpClass::Read, 5 * MS);
        assert!(!sched.model(OpClass::Read).is_bootstrapped());
        assert_eq!(sched.config().latency_target_ns[OpClass::Read], 5 * MS);
    }

    #[test]
    fn test_invalid_configuration_leaves_state_unchanged() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        assert!(sched.set_batch_limit(OpClass::Read, 0).is_err());
        assert!(sched.set_refill_ratio(101).is_err());
        assert_eq!(sched.config(), SchedulerConfig::default());

        let mut bad = SchedulerConfig::default();
        bad.batch_limit[OpClass::Other] = 0;
        assert!(matches!(Scheduler::new(bad), Err(Error::Config(_))));
    }

    #[test]
    fn test_reset_commands() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        warm_up(&sched, 1, OpClass::Read, 50_000);
        assert_eq!(sched.stats().batch_size_highest[OpClass::Read], 1);

        sched.reset_batch_stats();
        assert_eq!(sched.stats().batch_size_highest[OpClass::Read], 0);
        sched.reset_latency_model(OpClass::Read);
        assert_eq!(sched.model_snapshot(OpClass::Read), ModelSnapshot::default());
    }

    #[test]
    fn test_check_quiescent_reports_outstanding() {
        let (sched, _) = scheduler(SchedulerConfig::default());
        sched.submit(Request::new(1, OpClass::Read, 4096, 0)).unwrap();
        assert!(sched.has_work());
        assert!(matches!(
            sched.check_quiescent(),
            Err(Error::InvariantViolation(_))
        ));
        let mut rq = sched.next().unwrap();
        assert!(!sched.has_work());
        assert_eq!(sched.queued(), 1);
        sched.complete(&mut rq, 0);
        assert_eq!(sched.queued(), 0);
        sched.check_quiescent().unwrap();
    }
}
