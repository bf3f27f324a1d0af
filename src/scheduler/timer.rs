use super::Scheduler;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

const DISARMED: u64 = 0;

/// One-shot recalibration deadline that can only be pulled earlier.
#[derive(Debug, Default)]
pub struct RecalibrationTimer {
    expires_ns: AtomicU64,
}

impl RecalibrationTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `now + delay`, unless already armed for an earlier time.
    pub fn arm(&self, now_ns: u64, delay_ns: u64) {
        let target = now_ns.saturating_add(delay_ns).max(1);
        let _ = self
            .expires_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current == DISARMED || target < current).then_some(target)
            });
    }

    /// Disarm and return true if the timer has expired at `now`.
    pub fn poll(&self, now_ns: u64) -> bool {
        let current = self.expires_ns.load(Ordering::Acquire);
        if current == DISARMED || now_ns < current {
            return false;
        }
        self.expires_ns
            .compare_exchange(current, DISARMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn expires_at(&self) -> Option<u64> {
        match self.expires_ns.load(Ordering::Acquire) {
            DISARMED => None,
            at => Some(at),
        }
    }
}

/// Background thread that drives [`Scheduler::tick`] from the scheduler's clock.
pub struct RecalibrationWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RecalibrationWorker {
    pub fn spawn(scheduler: Arc<Scheduler>, poll_interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("iosched-recalibrate".to_string())
            .spawn(move || {
                debug!(?poll_interval, "recalibration worker started");
                loop {
                    match shutdown_rx.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            scheduler.tick(scheduler.now_ns());
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("recalibration worker stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("recalibration worker panicked");
            }
        }
    }
}

impl Drop for RecalibrationWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
