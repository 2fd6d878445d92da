//! Summary child: a hot/cold sample buffer feeding a ring of rotating
//! biased-quantile streams, giving quantiles over a sliding time window
//! while `_sum`/`_count` remain lifetime totals.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Instant;

use crate::error::{MetricsError, Result};
use crate::quantile::{QuantileStream, Target};

use super::Published;

/// Configuration for a summary's sample buffering and age-bucket rotation.
#[derive(Clone, Debug)]
pub struct SummaryConfig {
    /// `(quantile, epsilon)` targets, in the order they are emitted.
    pub targets: Arc<[Target]>,
    /// Span of time the rotating age buckets together cover.
    pub max_age: Duration,
    /// Number of rotating quantile streams.
    pub age_buckets: usize,
    /// Number of samples the hot buffer holds before it is flushed.
    pub buffer_capacity: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            targets: Arc::from(Vec::new()),
            max_age: Duration::from_secs(10 * 60),
            age_buckets: 5,
            buffer_capacity: 500,
        }
    }
}

#[derive(Debug)]
struct HotBuffer {
    samples: Vec<f64>,
    expires_at: Instant,
}

#[derive(Debug)]
struct MainState {
    streams: Vec<(QuantileStream, Instant)>,
    head: usize,
    count: u64,
    sum: f64,
}

/// A point-in-time view of a summary's reportable state.
pub struct SummarySnapshot {
    /// Lifetime sum of all observed values.
    pub sum: f64,
    /// Lifetime count of all observed values.
    pub count: u64,
    /// `(quantile, value)` pairs in configured order; `value` is `NaN` if
    /// the windowed stream holds no samples.
    pub quantiles: Vec<(f64, f64)>,
}

/// A summary: buffered observations feeding rotating biased-quantile
/// streams, reported as a sliding-window quantile set alongside a lifetime
/// sum and count.
#[derive(Debug)]
pub struct Summary {
    targets: Arc<[Target]>,
    max_age: Duration,
    age_buckets: usize,
    buffer_capacity: usize,

    hot: Mutex<HotBuffer>,
    main: Mutex<MainState>,
    published: Published,
}

impl Summary {
    /// Builds a summary from `config`, seeded with the current time `now`.
    pub fn new(config: SummaryConfig, suppress_initial_value: bool, now: Instant) -> Result<Self> {
        if config.max_age.is_zero() {
            return Err(MetricsError::IllegalConfiguration("summary max_age must be positive"));
        }
        if config.age_buckets == 0 {
            return Err(MetricsError::IllegalConfiguration("summary age_buckets must be positive"));
        }
        if config.buffer_capacity == 0 {
            return Err(MetricsError::IllegalConfiguration(
                "summary buffer_capacity must be positive",
            ));
        }

        let bucket_width = config.max_age / config.age_buckets as u32;
        let streams = (0..config.age_buckets)
            .map(|i| {
                let stream = QuantileStream::new(config.targets.clone());
                let expires_at = now + bucket_width * (i as u32 + 1);
                (stream, expires_at)
            })
            .collect();

        Ok(Self {
            targets: config.targets,
            max_age: config.max_age,
            age_buckets: config.age_buckets,
            buffer_capacity: config.buffer_capacity,
            hot: Mutex::new(HotBuffer { samples: Vec::new(), expires_at: now + bucket_width }),
            main: Mutex::new(MainState { streams, head: 0, count: 0, sum: 0.0 }),
            published: Published::new(!suppress_initial_value),
        })
    }

    fn bucket_width(&self) -> Duration {
        self.max_age / self.age_buckets as u32
    }

    /// Records a sample. `NaN` is ignored. The sample is appended to the hot
    /// buffer; the buffer is flushed into every rotating stream if it has
    /// expired or is now full.
    pub fn observe(&self, value: f64, now: Instant) {
        if value.is_nan() {
            return;
        }

        let should_flush = {
            let mut hot = self.hot.lock();
            hot.samples.push(value);
            now >= hot.expires_at || hot.samples.len() >= self.buffer_capacity
        };

        if should_flush {
            self.flush(now);
        }

        self.published.latch();
    }

    /// Swaps the hot buffer's contents into the rotating streams. Always
    /// acquires the buffer lock before the main lock.
    fn flush(&self, now: Instant) {
        let mut hot = self.hot.lock();
        if now >= hot.expires_at {
            hot.expires_at = now + self.bucket_width();
        }
        let cold = std::mem::take(&mut hot.samples);

        if cold.is_empty() {
            return;
        }

        let mut main = self.main.lock();
        for (stream, _) in main.streams.iter_mut() {
            stream.merge(cold.clone());
        }
        main.count += cold.len() as u64;
        main.sum += cold.iter().sum::<f64>();
        self.rotate(&mut main, now);
    }

    fn rotate(&self, main: &mut MainState, now: Instant) {
        let max_age = self.max_age;
        while main.streams[main.head].1 <= now {
            let (stream, expires_at) = &mut main.streams[main.head];
            stream.reset();
            *expires_at = now + max_age;
            main.head = (main.head + 1) % self.age_buckets;
        }
    }

    /// Forces a flush and returns the current reportable state: lifetime
    /// sum and count, plus one windowed quantile value per configured
    /// target, in order.
    pub fn snapshot(&self, now: Instant) -> SummarySnapshot {
        self.flush(now);

        let main = self.main.lock();
        let head = &main.streams[main.head].0;
        let quantiles = self
            .targets
            .iter()
            .map(|&(q, _)| {
                let value = if head.is_empty() { f64::NAN } else { head.query(q).unwrap_or(f64::NAN) };
                (q, value)
            })
            .collect();

        SummarySnapshot { sum: main.sum, count: main.count, quantiles }
    }

    /// Whether the summary has ever been successfully written.
    pub fn published(&self) -> bool {
        self.published.get()
    }

    /// Marks the summary unpublished.
    pub fn unpublish(&self) {
        self.published.unpublish()
    }
}
