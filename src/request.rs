//! Request types shared between the host and the scheduler core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Operation class of a request.
///
/// Each class gets its own latency target, batch limit and latency model.
/// Declaration order is the strict dispatch priority within a batch page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum OpClass {
    Read = 0,
    Write = 1,
    Discard = 2,
    Other = 3,
}

impl OpClass {
    pub const COUNT: usize = 4;

    /// All classes in dispatch-priority order.
    pub const ALL: [OpClass; OpClass::COUNT] =
        [OpClass::Read, OpClass::Write, OpClass::Discard, OpClass::Other];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            OpClass::Read => "read",
            OpClass::Write => "write",
            OpClass::Discard => "discard",
            OpClass::Other => "other",
        }
    }
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed per-class table, indexable by [`OpClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassTable<T>(pub [T; OpClass::COUNT]);

impl<T> ClassTable<T> {
    pub fn from_fn(mut f: impl FnMut(OpClass) -> T) -> Self {
        ClassTable(OpClass::ALL.map(&mut f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (OpClass, &T)> + '_ {
        OpClass::ALL.iter().copied().zip(self.0.iter())
    }
}

impl<T> Index<OpClass> for ClassTable<T> {
    type Output = T;

    #[inline]
    fn index(&self, class: OpClass) -> &T {
        &self.0[class.index()]
    }
}

impl<T> IndexMut<OpClass> for ClassTable<T> {
    #[inline]
    fn index_mut(&mut self, class: OpClass) -> &mut T {
        &mut self.0[class.index()]
    }
}

/// Host-assigned request identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rq#{}", self.0)
    }
}

/// Scheduler-attached metadata, taken from the metadata pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedData {
    pub deadline: u64,
    pub predicted_latency: u64,
    pub block_size: u64,
    /// Set once `predicted_latency` has been charged to the in-flight total.
    pub(crate) charged: bool,
}

/// An I/O request as seen by the scheduler.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub op: OpClass,
    /// Transfer size in bytes.
    pub size: u64,
    /// Arrival timestamp (ns).
    pub arrival_ns: u64,
    /// Device start timestamp (ns), stamped by the host after dispatch.
    pub start_ns: Option<u64>,
    pub user_data: u64,
    pub(crate) sched: Option<SchedData>,
    pub(crate) counted: bool,
}

impl Request {
    pub fn new(id: u64, op: OpClass, size: u64, arrival_ns: u64) -> Self {
        Self {
            id: RequestId(id),
            op,
            size,
            arrival_ns,
            start_ns: None,
            user_data: 0,
            sched: None,
            counted: false,
        }
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }

    /// Record the time the device started servicing this request.
    pub fn mark_started(&mut self, now_ns: u64) {
        self.start_ns = Some(now_ns);
    }

    pub fn sched_data(&self) -> Option<&SchedData> {
        self.sched.as_ref()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.sched.map(|d| d.deadline)
    }

    pub fn predicted_latency(&self) -> Option<u64> {
        self.sched.map(|d| d.predicted_latency)
    }
}
