//! Raw latency observations between recalibrations.

pub const NUM_BUCKETS: usize = 64;

/// Map a measured latency onto a bucket, relative to a reference latency.
///
/// Resolution is 1/20 of the reference below 2x, 1/10 up to 5x and 1/3
/// beyond, so the region around the expected latency is the finest.
pub fn bucket_index(measured: u64, reference: u64) -> usize {
    let measured = measured as u128;
    let reference = reference.max(1) as u128;

    let index = if measured < reference * 2 {
        measured * 20 / reference
    } else if measured < reference * 5 {
        measured * 10 / reference + 20
    } else {
        measured * 3 / reference + 40
    };

    index.min(NUM_BUCKETS as u128 - 1) as usize
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bucket {
    pub count: u64,
    pub sum_latency: u64,
    pub sum_block_size: u64,
}

/// Sums over the retained (non-outlier) part of a histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimmedSums {
    pub count: u64,
    pub sum_latency: u64,
    pub sum_block_size: u64,
}

#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: [Bucket; NUM_BUCKETS],
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: [Bucket::default(); NUM_BUCKETS],
        }
    }

    pub fn record(&mut self, index: usize, latency: u64, block_size: u64) {
        let bucket = &mut self.buckets[index];
        bucket.count += 1;
        bucket.sum_latency = bucket.sum_latency.saturating_add(latency);
        bucket.sum_block_size = bucket.sum_block_size.saturating_add(block_size);
    }

    pub fn bucket(&self, index: usize) -> &Bucket {
        &self.buckets[index]
    }

    pub fn total_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.count == 0)
    }

    pub fn clear(&mut self) {
        self.buckets = [Bucket::default(); NUM_BUCKETS];
    }

    /// Sum the lowest `percentile` percent of samples.
    ///
    /// Buckets are walked in index order until the cumulative count reaches
    /// the target; the bucket holding the boundary contributes pro rata.
    pub fn trimmed(&self, percentile: u64) -> TrimmedSums {
        let total = self.total_count();
        let threshold = (total as u128 * percentile as u128 / 100) as u64;

        let mut sums = TrimmedSums::default();
        let mut cumulative = 0u64;

        for bucket in &self.buckets {
            let before = cumulative;
            cumulative += bucket.count;

            if cumulative < threshold {
                sums.count += bucket.count;
                sums.sum_latency = sums.sum_latency.saturating_add(bucket.sum_latency);
                sums.sum_block_size = sums.sum_block_size.saturating_add(bucket.sum_block_size);
                continue;
            }

            let remaining = threshold - before;
            if bucket.count > 0 {
                sums.sum_latency = sums
                    .sum_latency
                    .saturating_add(pro_rata(bucket.sum_latency, remaining, bucket.count));
                sums.sum_block_size = sums
                    .sum_block_size
                    .saturating_add(pro_rata(bucket.sum_block_size, remaining, bucket.count));
            }
            sums.count += remaining;
            break;
        }

        sums
    }
}

#[inline]
fn pro_rata(sum: u64, part: u64, whole: u64) -> u64 {
    (sum as u128 * part as u128 / whole as u128) as u64
}
