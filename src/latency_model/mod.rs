//! Per-class online latency model.
//!
//! The model predicts `base + slope * ceil((size - 4096) / 1024)`. Completion
//! observations land in two 64-bucket histograms (small and large requests)
//! and are folded into lifetime accumulators by [`LatencyModel::recalibrate`],
//! with the slowest 1% of samples trimmed as outliers once the model is
//! bootstrapped.
//!
//! Two locks guard a model. The parameter lock covers `base`, `slope` and the
//! accumulators and is taken by `predict`; the histogram lock covers the raw
//! buckets and is taken by `observe`. Only `recalibrate` and `reset` take
//! both, always parameter lock first.

pub mod histogram;

use histogram::{bucket_index, Histogram};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Requests up to this size are "small" and predicted as `base` alone.
pub const BLOCK_SIZE_THRESHOLD: u64 = 4096;
/// A histogram holding this many samples is folded without waiting.
pub const SAMPLES_THRESHOLD: u64 = 1024;
/// Minimum time between regular recalibrations.
pub const INTERVAL_THRESHOLD_NS: u64 = 1_500_000_000;
pub const OUTLIER_PERCENTILE: u64 = 99;

const KIB: u64 = 1024;

/// Model parameters and lifetime accumulators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelSnapshot {
    pub base: u64,
    pub slope: u64,
    pub small_sum_delay: u64,
    pub small_count: u64,
    pub large_sum_delay: u64,
    pub large_sum_block_size: u64,
}

impl fmt::Display for ModelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "base : {} ns", self.base)?;
        writeln!(f, "slope: {} ns / kB", self.slope)?;
        writeln!(f, "small: {} ns / {} rq", self.small_sum_delay, self.small_count)?;
        write!(f, "large: {} ns / {} B", self.large_sum_delay, self.large_sum_block_size)
    }
}

#[derive(Debug)]
struct Params {
    stats: ModelSnapshot,
    last_updated_ns: u64,
}

#[derive(Debug, Default)]
struct Buckets {
    small: Histogram,
    large: Histogram,
}

/// What a call to [`LatencyModel::recalibrate`] folded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recalibration {
    pub small_folded: bool,
    pub large_folded: bool,
    pub base: u64,
    pub slope: u64,
}

impl Recalibration {
    pub fn folded_any(&self) -> bool {
        self.small_folded || self.large_folded
    }
}

#[derive(Debug)]
pub struct LatencyModel {
    params: Mutex<Params>,
    buckets: Mutex<Buckets>,
    /// Copy of `base` readable without either lock.
    base_hint: AtomicU64,
}

impl LatencyModel {
    pub fn new(now_ns: u64) -> Self {
        Self {
            params: Mutex::new(Params {
                stats: ModelSnapshot::default(),
                last_updated_ns: now_ns,
            }),
            buckets: Mutex::new(Buckets::default()),
            base_hint: AtomicU64::new(0),
        }
    }

    /// Predicted service latency (ns) for a request of `size` bytes.
    pub fn predict(&self, size: u64) -> u64 {
        let params = self.params.lock();
        let ModelSnapshot { base, slope, .. } = params.stats;
        drop(params);

        if size <= BLOCK_SIZE_THRESHOLD {
            return base;
        }
        let kib = (size - BLOCK_SIZE_THRESHOLD).div_ceil(KIB);
        base.saturating_add(slope.saturating_mul(kib))
    }

    /// Whether `base` has been established from at least one observation.
    #[inline]
    pub fn is_bootstrapped(&self) -> bool {
        self.base_hint.load(Ordering::Acquire) != 0
    }

    /// Record one completion.
    ///
    /// Small samples are bucketed against the shared `base`, large samples
    /// against the request's own prediction. Until `base` exists every small
    /// sample triggers a recalibration and large samples are discarded.
    pub fn observe(&self, size: u64, measured: u64, predicted: u64, now_ns: u64) {
        let base = self.base_hint.load(Ordering::Acquire);
        let mut buckets = self.buckets.lock();

        if size <= BLOCK_SIZE_THRESHOLD {
            buckets
                .small
                .record(bucket_index(measured, base), measured, size);
            if base == 0 {
                drop(buckets);
                self.recalibrate(now_ns);
            }
        } else if base != 0 {
            buckets
                .large
                .record(bucket_index(measured, predicted), measured, size);
        }
    }

    /// Fold pending histogram samples into the accumulators and refresh
    /// `base`/`slope`. Safe to call at any time, including with no samples.
    pub fn recalibrate(&self, now_ns: u64) -> Recalibration {
        let mut params = self.params.lock();
        let mut buckets = self.buckets.lock();

        let Params {
            stats,
            last_updated_ns,
        } = &mut *params;
        let bootstrapping = stats.base == 0;
        let time_elapsed = bootstrapping
            || now_ns.saturating_sub(*last_updated_ns) >= INTERVAL_THRESHOLD_NS;

        let small_count = buckets.small.total_count();
        let large_count = buckets.large.total_count();
        let mut outcome = Recalibration::default();

        if small_count > 0 && (time_elapsed || small_count >= SAMPLES_THRESHOLD || bootstrapping) {
            let percentile = if bootstrapping { 100 } else { OUTLIER_PERCENTILE };
            let sums = buckets.small.trimmed(percentile);
            stats.small_sum_delay = stats.small_sum_delay.saturating_add(sums.sum_latency);
            stats.small_count = stats.small_count.saturating_add(sums.count);
            buckets.small.clear();
            outcome.small_folded = true;
        }

        if large_count > 0 && (time_elapsed || large_count >= SAMPLES_THRESHOLD || stats.slope == 0) {
            let percentile = if stats.slope == 0 { 100 } else { OUTLIER_PERCENTILE };
            let sums = buckets.large.trimmed(percentile);
            let intercept = stats.base.saturating_mul(sums.count);
            if sums.sum_latency > intercept {
                stats.large_sum_delay = stats
                    .large_sum_delay
                    .saturating_add(sums.sum_latency - intercept);
            }
            stats.large_sum_block_size = stats
                .large_sum_block_size
                .saturating_add(sums.sum_block_size);
            buckets.large.clear();
            outcome.large_folded = true;
        }

        drop(buckets);

        if outcome.small_folded && stats.small_count > 0 {
            stats.base = stats.small_sum_delay / stats.small_count;
        }
        if outcome.large_folded && stats.large_sum_block_size > 0 {
            stats.slope = stats.large_sum_delay / stats.large_sum_block_size.div_ceil(KIB);
        }
        outcome.base = stats.base;
        outcome.slope = stats.slope;
        self.base_hint.store(stats.base, Ordering::Release);

        if time_elapsed {
            *last_updated_ns = now_ns;
        }

        if outcome.folded_any() {
            debug!(
                base = outcome.base,
                slope = outcome.slope,
                small_samples = small_count,
                large_samples = large_count,
                "latency model recalibrated"
            );
        }
        outcome
    }

    /// Forget `base` so the model re-bootstraps; accumulators are kept.
    pub fn clear_base(&self) {
        let mut params = self.params.lock();
        params.stats.base = 0;
        self.base_hint.store(0, Ordering::Release);
    }

    /// Zero all parameters, accumulators and pending samples.
    pub fn reset(&self) {
        let mut params = self.params.lock();
        let mut buckets = self.buckets.lock();
        params.stats = ModelSnapshot::default();
        buckets.small.clear();
        buckets.large.clear();
        self.base_hint.store(0, Ordering::Release);
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        self.params.lock().stats
    }

    /// Samples waiting for the next recalibration, `(small, large)`.
    pub fn pending_samples(&self) -> (u64, u64) {
        let buckets = self.buckets.lock();
        (buckets.small.total_count(), buckets.large.total_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 200_000;

    fn bootstrapped(base: u64) -> LatencyModel {
        let model = LatencyModel::new(0);
        model.observe(4096, base, 0, 0);
        assert_eq!(model.snapshot().base, base);
        model
    }

    #[test]
    fn test_first_small_sample_bootstraps_base() {
        let model = LatencyModel::new(0);
        assert!(!model.is_bootstrapped());
        assert_eq!(model.predict(512), 0);

        model.observe(512, T, 0, 10);
        assert!(model.is_bootstrapped());
        assert_eq!(model.predict(512), T);
        assert_eq!(model.pending_samples(), (0, 0));
    }

    #[test]
    fn test_large_samples_dropped_before_bootstrap() {
        let model = LatencyModel::new(0);
        model.observe(1 << 20, T, 0, 10);
        assert_eq!(model.pending_samples(), (0, 0));
        assert_eq!(model.snapshot(), ModelSnapshot::default());
    }

    #[test]
    fn test_constant_stream_converges_exactly() {
        let model = bootstrapped(T);
        for _ in 0..2048 {
            model.observe(4096, T, 0, 1);
        }
        let outcome = model.recalibrate(1);
        assert!(outcome.small_folded);
        assert_eq!(model.snapshot().base, T);
        assert_eq!(model.pending_samples(), (0, 0));
    }

    #[test]
    fn test_outliers_are_trimmed() {
        let model = bootstrapped(T);
        for _ in 0..999 {
            model.observe(4096, T, 0, 1);
        }
        for _ in 0..11 {
            model.observe(4096, 100 * T, 0, 1);
        }
        model.recalibrate(INTERVAL_THRESHOLD_NS);
        let base = model.snapshot().base;
        assert!(base.abs_diff(T) <= T / 100, "base {} skewed away from {}", base, T);
    }

    #[test]
    fn test_recalibration_waits_for_interval_or_samples() {
        let model = bootstrapped(T);
        for _ in 0..10 {
            model.observe(4096, 2 * T, 0, 1);
        }
        let outcome = model.recalibrate(INTERVAL_THRESHOLD_NS - 1);
        assert!(!outcome.folded_any());
        assert_eq!(model.pending_samples(), (10, 0));

        let outcome = model.recalibrate(INTERVAL_THRESHOLD_NS);
        assert!(outcome.small_folded);
        assert_eq!(model.pending_samples(), (0, 0));
        assert!(model.snapshot().base > T);
    }

    #[test]
    fn test_recalibrate_without_samples_is_noop() {
        let model = bootstrapped(T);
        let before = model.snapshot();
        let outcome = model.recalibrate(10 * INTERVAL_THRESHOLD_NS);
        assert!(!outcome.folded_any());
        assert_eq!(model.snapshot(), before);
    }

    #[test]
    fn test_slope_from_large_samples() {
        let model = bootstrapped(1000);
        let size = 12 * 1024;
        assert_eq!(model.predict(size), 1000);
        for _ in 0..10 {
            model.observe(size, 5000, 1000, 1);
        }
        assert_eq!(model.pending_samples(), (0, 10));
        let outcome = model.recalibrate(1);
        assert!(outcome.large_folded);

        let snap = model.snapshot();
        assert_eq!(snap.large_sum_delay, 4000 * 10);
        assert_eq!(snap.large_sum_block_size, size * 10);
        assert_eq!(snap.slope, 40_000 / 120);
    }

    #[test]
    fn test_large_samples_below_base_add_no_delay() {
        let model = bootstrapped(1000);
        for _ in 0..4 {
            model.observe(8192, 500, 1000, 1);
        }
        model.recalibrate(1);
        let snap = model.snapshot();
        assert_eq!(snap.large_sum_delay, 0);
        assert_eq!(snap.large_sum_block_size, 4 * 8192);
        assert_eq!(snap.slope, 0);
    }

    #[test]
    fn test_predict_rounds_partial_kib_up() {
        let model = bootstrapped(1000);
        {
            let mut params = model.params.lock();
            params.stats.slope = 10;
        }
        assert_eq!(model.predict(4096), 1000);
        assert_eq!(model.predict(4097), 1010);
        assert_eq!(model.predict(4096 + 1024), 1010);
        assert_eq!(model.predict(4096 + 1025), 1020);
    }

    #[test]
    fn test_prediction_is_monotonic_in_size() {
        let model = bootstrapped(1000);
        model.params.lock().stats.slope = 37;
        let mut last = 0;
        for size in (4097..(1 << 20)).step_by(3001) {
            let p = model.predict(size);
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn test_clear_base_rebootstraps_from_accumulators() {
        let model = bootstrapped(T);
        model.clear_base();
        assert!(!model.is_bootstrapped());
        model.observe(4096, 3 * T, 0, 1);
        // Lifetime accumulators: (T + 3T) / 2.
        assert_eq!(model.snapshot().base, 2 * T);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let model = bootstrapped(T);
        model.observe(4096, T, 0, 1);
        model.reset();
        assert_eq!(model.snapshot(), ModelSnapshot::default());
        assert_eq!(model.pending_samples(), (0, 0));
        assert!(!model.is_bootstrapped());
    }

    #[test]
    fn test_snapshot_display() {
        let snap = ModelSnapshot {
            base: 1,
            slope: 2,
            small_sum_delay: 3,
            small_count: 4,
            large_sum_delay: 5,
            large_sum_block_size: 6,
        };
        assert_eq!(
            snap.to_string(),
            "base : 1 ns\nslope: 2 ns / kB\nsmall: 3 ns / 4 rq\nlarge: 5 ns / 6 B"
        );
    }
}
