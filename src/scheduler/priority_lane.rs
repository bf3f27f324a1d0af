use crate::request::{Request, RequestId};
use std::collections::VecDeque;

/// FIFO drained ahead of the batch pages.
///
/// Requeued requests enter at the head; pass-through requests (no pooled
/// metadata) enter at the tail.
#[derive(Debug, Default)]
pub struct PriorityLane {
    queue: VecDeque<Request>,
}

impl PriorityLane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&mut self, request: Request) {
        self.queue.push_front(request);
    }

    pub fn push_back(&mut self, request: Request) {
        self.queue.push_back(request);
    }

    pub fn pop_front(&mut self) -> Option<Request> {
        self.queue.pop_front()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.queue.iter().any(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
