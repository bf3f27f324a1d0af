//! Scheduler configuration.
//!
//! [`SchedulerConfig`] is the serialisable, validated description of a
//! scheduler instance. [`Tunables`] is the live copy a running scheduler
//! reads on every fill and dispatch; each field is an independent atomic so
//! the configuration surface can be written at any time without taking the
//! scheduler lock.

use crate::error::{Error, Result};
use crate::request::{ClassTable, OpClass};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const NSEC_PER_MSEC: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Per-class latency target added to the arrival time to form the deadline.
    pub latency_target_ns: ClassTable<u64>,
    /// Per-class maximum number of requests admitted to one batch page.
    pub batch_limit: ClassTable<u32>,
    /// Upper bound on the total predicted latency in flight.
    pub global_latency_window_ns: u64,
    /// Refill the inactive page early while in-flight latency is below
    /// this percentage of the global window.
    pub refill_ratio_percent: u32,
    /// Number of pooled per-request metadata records.
    pub metadata_pool_capacity: usize,
    /// Delay between the last completion and the next recalibration.
    pub recalibration_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            latency_target_ns: ClassTable([
                2 * NSEC_PER_MSEC,
                750 * NSEC_PER_MSEC,
                5000 * NSEC_PER_MSEC,
                0,
            ]),
            batch_limit: ClassTable([64, 32, 1, 1]),
            global_latency_window_ns: 16 * NSEC_PER_MSEC,
            refill_ratio_percent: 15,
            metadata_pool_capacity: 1024,
            recalibration_delay_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        for (class, &limit) in self.batch_limit.iter() {
            validate_batch_limit(class, limit)?;
        }
        validate_refill_ratio(self.refill_ratio_percent)?;
        if self.metadata_pool_capacity == 0 {
            return Err(Error::Config(
                "metadata_pool_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SchedulerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn validate_batch_limit(class: OpClass, limit: u32) -> Result<()> {
    if limit == 0 {
        return Err(Error::Config(format!(
            "batch limit for {} must be at least 1",
            class
        )));
    }
    Ok(())
}

fn validate_refill_ratio(ratio: u32) -> Result<()> {
    if ratio > 100 {
        return Err(Error::Config(format!(
            "refill ratio must be within 0..=100, got {}",
            ratio
        )));
    }
    Ok(())
}

/// Live scheduler parameters.
#[derive(Debug)]
pub struct Tunables {
    latency_target_ns: ClassTable<AtomicU64>,
    batch_limit: ClassTable<AtomicU32>,
    global_latency_window_ns: AtomicU64,
    refill_ratio_percent: AtomicU32,
    recalibration_delay_ns: AtomicU64,
    metadata_pool_capacity: usize,
}

impl Tunables {
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            latency_target_ns: ClassTable::from_fn(|c| {
                AtomicU64::new(config.latency_target_ns[c])
            }),
            batch_limit: ClassTable::from_fn(|c| AtomicU32::new(config.batch_limit[c])),
            global_latency_window_ns: AtomicU64::new(config.global_latency_window_ns),
            refill_ratio_percent: AtomicU32::new(config.refill_ratio_percent),
            recalibration_delay_ns: AtomicU64::new(
                config.recalibration_delay_ms.saturating_mul(NSEC_PER_MSEC),
            ),
            metadata_pool_capacity: config.metadata_pool_capacity,
        })
    }

    #[inline]
    pub fn latency_target(&self, class: OpClass) -> u64 {
        self.latency_target_ns[class].load(Ordering::Relaxed)
    }

    pub(crate) fn store_latency_target(&self, class: OpClass, nsec: u64) {
        self.latency_target_ns[class].store(nsec, Ordering::Relaxed);
    }

    #[inline]
    pub fn batch_limit(&self, class: OpClass) -> u32 {
        self.batch_limit[class].load(Ordering::Relaxed)
    }

    pub fn set_batch_limit(&self, class: OpClass, limit: u32) -> Result<()> {
        validate_batch_limit(class, limit)?;
        self.batch_limit[class].store(limit, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    pub fn global_latency_window(&self) -> u64 {
        self.global_latency_window_ns.load(Ordering::Relaxed)
    }

    pub fn set_global_latency_window(&self, nsec: u64) {
        self.global_latency_window_ns.store(nsec, Ordering::Relaxed);
    }

    #[inline]
    pub fn refill_ratio(&self) -> u32 {
        self.refill_ratio_percent.load(Ordering::Relaxed)
    }

    pub fn set_refill_ratio(&self, ratio: u32) -> Result<()> {
        validate_refill_ratio(ratio)?;
        self.refill_ratio_percent.store(ratio, Ordering::Relaxed);
        Ok(())
    }

    /// In-flight latency below which the inactive page is refilled early.
    #[inline]
    pub fn refill_threshold(&self) -> u64 {
        let window = self.global_latency_window() as u128;
        (window * self.refill_ratio() as u128 / 100) as u64
    }

    #[inline]
    pub fn recalibration_delay_ns(&self) -> u64 {
        self.recalibration_delay_ns.load(Ordering::Relaxed)
    }

    pub fn set_recalibration_delay_ms(&self, msec: u64) {
        self.recalibration_delay_ns
            .store(msec.saturating_mul(NSEC_PER_MSEC), Ordering::Relaxed);
    }

    pub fn metadata_pool_capacity(&self) -> usize {
        self.metadata_pool_capacity
    }

    /// Current values as a plain config.
    pub fn snapshot(&self) -> SchedulerConfig {
        SchedulerConfig {
            latency_target_ns: ClassTable::from_fn(|c| self.latency_target(c)),
            batch_limit: ClassTable::from_fn(|c| self.batch_limit(c)),
            global_latency_window_ns: self.global_latency_window(),
            refill_ratio_percent: self.refill_ratio(),
            metadata_pool_capacity: self.metadata_pool_capacity,
            recalibration_delay_ms: self.recalibration_delay_ns() / NSEC_PER_MSEC,
        }
    }
}
