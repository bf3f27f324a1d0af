#![allow(dead_code)]

use adaptive_iosched::{ManualClock, OpClass, Request, Scheduler, SchedulerConfig};
use proptest::prelude::*;
use std::sync::Arc;

pub fn manual_scheduler(config: SchedulerConfig) -> (Scheduler, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let sched = Scheduler::with_clock(config, clock.clone()).expect("valid config");
    (sched, clock)
}

/// Push one 4 KiB request of every class through the scheduler so each model
/// has `base == latency` and `slope == 0`. Ids `u64::MAX - 3..` are used.
pub fn bootstrap_all(sched: &Scheduler, latency: u64) {
    for class in OpClass::ALL {
        let id = u64::MAX - class.index() as u64;
        sched
            .submit(Request::new(id, class, 4096, 0))
            .expect("warm-up submit");
        let mut rq = sched.next().expect("warm-up request dispatched");
        rq.mark_started(0);
        sched.complete(&mut rq, latency);
    }
}

/// Dispatch and complete everything left in the scheduler.
pub fn drain(sched: &Scheduler, now_ns: u64) -> usize {
    let mut drained = 0;
    while let Some(mut rq) = sched.next() {
        sched.complete(&mut rq, now_ns);
        drained += 1;
    }
    drained
}

pub fn arb_class() -> impl Strategy<Value = OpClass> {
    prop_oneof![
        Just(OpClass::Read),
        Just(OpClass::Write),
        Just(OpClass::Discard),
        Just(OpClass::Other),
    ]
}

/// (class, size, arrival)
pub fn arb_request_shape() -> impl Strategy<Value = (OpClass, u64, u64)> {
    (arb_class(), 0u64..(256 * 1024), 0u64..50_000_000)
}
