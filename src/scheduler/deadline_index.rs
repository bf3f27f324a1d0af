use crate::request::{Request, RequestId};
use std::collections::{BTreeMap, HashMap};

/// (deadline, insertion sequence); the sequence keeps equal deadlines FIFO.
type Key = (u64, u64);

/// Not-yet-dispatched requests ordered by deadline.
///
/// Every request held here already carries its predicted latency and
/// deadline.
#[derive(Debug, Default)]
pub struct DeadlineIndex {
    by_deadline: BTreeMap<Key, Request>,
    keys: HashMap<RequestId, Key>,
    next_seq: u64,
}

impl DeadlineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stamped request. Returns it back if the id is already present
    /// or the request has no deadline.
    pub fn insert(&mut self, request: Request) -> Result<(), Request> {
        let deadline = match request.deadline() {
            Some(deadline) => deadline,
            None => return Err(request),
        };
        if self.keys.contains_key(&request.id) {
            return Err(request);
        }

        let key = (deadline, self.next_seq);
        self.next_seq += 1;
        self.keys.insert(request.id, key);
        self.by_deadline.insert(key, request);
        Ok(())
    }

    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        let key = self.keys.remove(&id)?;
        self.by_deadline.remove(&key)
    }

    /// Earliest-deadline request.
    pub fn front(&self) -> Option<&Request> {
        self.by_deadline.values().next()
    }

    pub fn pop_front(&mut self) -> Option<Request> {
        let (_, request) = self.by_deadline.pop_first()?;
        self.keys.remove(&request.id);
        Some(request)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }
}
