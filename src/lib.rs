//! Adaptive deadline I/O request scheduler.
//!
//! The scheduler stamps every request with a latency predicted by a
//! self-calibrating per-class model and a deadline derived from it, then
//! dispatches in batches whose total predicted latency stays inside a global
//! window. See [`Scheduler`] for the host-facing API.
//!
//! ```
//! use adaptive_iosched::{OpClass, Request, Scheduler, SchedulerConfig};
//!
//! let sched = Scheduler::new(SchedulerConfig::default())?;
//! sched.submit(Request::new(1, OpClass::Read, 4096, sched.now_ns()))?;
//!
//! let mut rq = sched.next().expect("one request queued");
//! rq.mark_started(sched.now_ns());
//! sched.complete(&mut rq, sched.now_ns());
//! sched.check_quiescent()?;
//! # Ok::<(), adaptive_iosched::Error>(())
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod latency_model;
pub mod logging;
pub mod metrics;
pub mod request;
pub mod scheduler;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{SchedulerConfig, Tunables};
pub use error::{Error, Rejected, Result};
pub use latency_model::{LatencyModel, ModelSnapshot};
pub use metrics::SchedulerMetrics;
pub use request::{ClassTable, OpClass, Request, RequestId, SchedData};
pub use scheduler::{
    BatchPagesSnapshot, RecalibrationWorker, Scheduler, SchedulerStats,
};
