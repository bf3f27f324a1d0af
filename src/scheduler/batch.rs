//! Double-buffered batch pages.
//!
//! One page is drained by dispatch while the other is filled from the
//! deadline index. A fill admits requests in deadline order until a class
//! reaches its batch limit, a class model is still warming up, or the
//! predicted latency in flight would exceed the global window. The first
//! request of every fill is admitted unconditionally.

use super::deadline_index::DeadlineIndex;
use super::stats::Counters;
use crate::config::Tunables;
use crate::latency_model::LatencyModel;
use crate::request::{ClassTable, OpClass, Request, RequestId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

const NUM_PAGES: usize = 2;

#[derive(Debug, Default)]
struct Page {
    queues: ClassTable<VecDeque<Request>>,
    counts: ClassTable<u32>,
}

impl Page {
    fn pop_by_priority(&mut self) -> Option<Request> {
        OpClass::ALL
            .iter()
            .find_map(|&class| self.queues[class].pop_front())
    }

    fn len(&self) -> usize {
        self.queues.0.iter().map(VecDeque::len).sum()
    }

    fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            queues: ClassTable::from_fn(|class| {
                self.queues[class]
                    .iter()
                    .map(|r| QueuedRequest {
                        id: r.id,
                        deadline: r.deadline().unwrap_or(0),
                        predicted_latency: r.predicted_latency().unwrap_or(0),
                    })
                    .collect()
            }),
        }
    }

    fn remove(&mut self, id: RequestId) -> Option<Request> {
        for queue in self.queues.0.iter_mut() {
            if let Some(pos) = queue.iter().position(|r| r.id == id) {
                return queue.remove(pos);
            }
        }
        None
    }
}

/// Shared state a fill reads besides the pages themselves.
pub(crate) struct FillContext<'a> {
    pub tunables: &'a Tunables,
    pub models: &'a ClassTable<LatencyModel>,
    pub in_flight: &'a AtomicU64,
}

#[derive(Debug, Default)]
pub struct BatchPages {
    pages: [Page; NUM_PAGES],
    active: usize,
    more_ready: bool,
}

impl BatchPages {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn inactive(&self) -> usize {
        (self.active + 1) % NUM_PAGES
    }

    pub fn active_page(&self) -> usize {
        self.active
    }

    /// Whether the inactive page holds a completed fill.
    pub fn more_ready(&self) -> bool {
        self.more_ready
    }

    pub fn flip(&mut self) {
        self.more_ready = false;
        self.active = self.inactive();
    }

    /// Fill the inactive page from `index`, starting the latency budget at
    /// `in_flight_start`. Returns the number of requests admitted.
    pub(crate) fn fill(
        &mut self,
        index: &mut DeadlineIndex,
        ctx: &FillContext<'_>,
        counters: &mut Counters,
        in_flight_start: u64,
    ) -> usize {
        let window = ctx.tunables.global_latency_window();
        let page_no = self.inactive();
        let page = &mut self.pages[page_no];
        page.counts = ClassTable::default();

        let mut per_class: ClassTable<u64> = ClassTable::default();
        let mut latency = in_flight_start;
        let mut admitted = 0usize;

        while let Some(candidate) = index.front() {
            let class = candidate.op;
            let predicted = candidate.predicted_latency().unwrap_or(0);
            latency = latency.saturating_add(predicted);

            if admitted > 0
                && (!ctx.models[class].is_bootstrapped()
                    || page.counts[class] >= ctx.tunables.batch_limit(class)
                    || latency > window)
            {
                break;
            }

            let Some(mut request) = index.pop_front() else {
                break;
            };
            if let Some(data) = request.sched.as_mut() {
                data.charged = true;
            }
            page.queues[class].push_back(request);
            page.counts[class] += 1;
            ctx.in_flight.fetch_add(predicted, Ordering::AcqRel);
            per_class[class] += 1;
            admitted += 1;
        }

        if admitted > 0 {
            self.more_ready = true;
            counters.record_fill(&per_class);
            debug!(
                page = page_no,
                admitted,
                read = per_class[OpClass::Read],
                write = per_class[OpClass::Write],
                discard = per_class[OpClass::Discard],
                other = per_class[OpClass::Other],
                "batch page filled"
            );
        }
        admitted
    }

    /// Take the next request from the active page in class-priority order,
    /// flipping or filling pages as needed.
    pub(crate) fn dispatch(
        &mut self,
        index: &mut DeadlineIndex,
        ctx: &FillContext<'_>,
        counters: &mut Counters,
    ) -> Option<Request> {
        let mut fill_tried = false;
        let in_flight = ctx.in_flight.load(Ordering::Acquire);

        if !self.more_ready && in_flight < ctx.tunables.refill_threshold() {
            self.fill(index, ctx, counters, in_flight);
            fill_tried = true;
        }

        loop {
            if let Some(request) = self.pages[self.active].pop_by_priority() {
                counters.dispatched = counters.dispatched.wrapping_add(1);
                trace!(request = %request.id, class = %request.op, page = self.active, "dispatch");
                return Some(request);
            }

            if self.more_ready {
                self.flip();
                continue;
            }

            if fill_tried {
                return None;
            }

            let in_flight = ctx.in_flight.load(Ordering::Acquire);
            if self.fill(index, ctx, counters, in_flight) > 0 {
                self.flip();
            }
            fill_tried = true;
        }
    }

    /// Remove a request that has not been dispatched yet.
    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        self.pages.iter_mut().find_map(|page| page.remove(id))
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pages
            .iter()
            .any(|page| page.queues.0.iter().any(|q| q.iter().any(|r| r.id == id)))
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(Page::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests of `class` queued on `page`.
    pub fn class_len(&self, page: usize, class: OpClass) -> usize {
        self.pages[page].queues[class].len()
    }

    pub fn snapshot(&self) -> BatchPagesSnapshot {
        BatchPagesSnapshot {
            active: self.active,
            more_ready: self.more_ready,
            pages: [self.pages[0].snapshot(), self.pages[1].snapshot()],
        }
    }
}

/// A request waiting on a batch page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub deadline: u64,
    pub predicted_latency: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    pub queues: ClassTable<Vec<QueuedRequest>>,
}

impl PageSnapshot {
    pub fn len(&self) -> usize {
        self.queues.0.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_predicted_latency(&self) -> u64 {
        self.queues
            .0
            .iter()
            .flatten()
            .map(|q| q.predicted_latency)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPagesSnapshot {
    pub active: usize,
    pub more_ready: bool,
    pub pages: [PageSnapshot; NUM_PAGES],
}

impl BatchPagesSnapshot {
    pub fn inactive(&self) -> &PageSnapshot {
        &self.pages[(self.active + 1) % NUM_PAGES]
    }
}
