//! Histogram child: fixed, strictly-increasing bucket bounds with a
//! cumulative-count linear scan and one exemplar slot per bucket.

use std::sync::Arc;
use std::time::Duration;

use quanta::Instant;

use crate::atomics::{AtomicCounterU64, AtomicF64};
use crate::error::{MetricsError, Result};
use crate::exemplar::{Exemplar, ExemplarObservation, ExemplarPool, ExemplarSlot};

use super::Published;

/// Default bucket upper bounds, matching the Prometheus client library
/// convention for HTTP-latency-shaped histograms.
pub const DEFAULT_HISTOGRAM_BOUNDS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0];

/// A histogram: fixed bucket bounds, one local counter and one exemplar
/// slot per bucket, and a running sum.
#[derive(Debug)]
pub struct Histogram {
    bounds: Arc<[f64]>,
    bucket_counts: Vec<AtomicCounterU64>,
    exemplars: Vec<ExemplarSlot>,
    sum: AtomicF64,
    published: Published,
}

impl Histogram {
    /// Builds a histogram over `bounds`, appending `+Inf` if it is not
    /// already the last bound. Fails if `bounds` is empty or not strictly
    /// increasing.
    pub fn new(
        bounds: &[f64],
        suppress_initial_value: bool,
        exemplar_min_interval: Option<Duration>,
    ) -> Result<Self> {
        if bounds.is_empty() {
            return Err(MetricsError::IllegalConfiguration("histogram bounds must not be empty"));
        }

        for window in bounds.windows(2) {
            if !(window[0] < window[1]) {
                return Err(MetricsError::IllegalConfiguration(
                    "histogram bounds must be strictly increasing",
                ));
            }
        }

        let mut full: Vec<f64> = bounds.to_vec();
        if *full.last().expect("checked non-empty above") != f64::INFINITY {
            full.push(f64::INFINITY);
        }

        let bucket_counts = full.iter().map(|_| AtomicCounterU64::new()).collect();
        let exemplars = full.iter().map(|_| ExemplarSlot::new(exemplar_min_interval)).collect();

        Ok(Self {
            bounds: Arc::from(full),
            bucket_counts,
            exemplars,
            sum: AtomicF64::new(0.0),
            published: Published::new(!suppress_initial_value),
        })
    }

    /// The bucket upper bounds, in ascending order, terminated by `+Inf`.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Records `count` observations of `value`. `NaN` is ignored. The
    /// observation is added to the smallest-index bucket whose bound is
    /// greater than or equal to `value`, via a linear scan.
    pub fn observe(
        &self,
        value: f64,
        count: u64,
        exemplar: Option<ExemplarObservation>,
        pool: &ExemplarPool,
        now: Instant,
    ) -> Result<()> {
        if value.is_nan() {
            return Ok(());
        }

        let bucket = self.bucket_index(value);
        self.bucket_counts[bucket].add(count);
        self.sum.add(value * count as f64);

        if let Some(obs) = exemplar {
            self.exemplars[bucket].record(pool, obs.labels, obs.value, obs.timestamp_unix_secs, now)?;
        }

        self.published.latch();
        Ok(())
    }

    /// Finds the smallest-index bucket whose bound is `>= value`, via a
    /// plain linear scan (the normative algorithm; a vectorized scan
    /// producing identical results would be a drop-in replacement).
    fn bucket_index(&self, value: f64) -> usize {
        self.bounds
            .iter()
            .position(|&bound| bound >= value)
            .unwrap_or(self.bounds.len() - 1)
    }

    /// The running sum of all recorded values.
    pub fn sum(&self) -> f64 {
        self.sum.get()
    }

    /// The cumulative observation count per bucket, in ascending bound
    /// order (each entry is the running total across all buckets up to and
    /// including that one).
    pub fn cumulative_counts(&self) -> Vec<u64> {
        let mut running = 0u64;
        self.bucket_counts
            .iter()
            .map(|count| {
                running += count.get();
                running
            })
            .collect()
    }

    /// Total observation count across all buckets.
    pub fn count(&self) -> u64 {
        self.bucket_counts.iter().map(|c| c.get()).sum()
    }

    /// Borrows the exemplar for bucket `index`, if present.
    pub fn borrow_exemplar(&self, index: usize) -> Option<Box<Exemplar>> {
        self.exemplars.get(index).and_then(|slot| slot.borrow())
    }

    /// Returns a previously borrowed exemplar to bucket `index`.
    pub fn give_back_exemplar(&self, index: usize, exemplar: Box<Exemplar>, pool: &ExemplarPool) {
        if let Some(slot) = self.exemplars.get(index) {
            slot.give_back(exemplar, pool);
        }
    }

    /// Whether the histogram has ever been successfully written.
    pub fn published(&self) -> bool {
        self.published.get()
    }

    /// Marks the histogram unpublished.
    pub fn unpublish(&self) {
        self.published.unpublish()
    }
}
