//! Per-label-combination metric state: the four child kinds and the
//! published/serialize contract they share.

mod counter;
mod gauge;
mod histogram;
mod summary;

pub use counter::Counter;
pub use gauge::Gauge;
pub use histogram::{Histogram, DEFAULT_HISTOGRAM_BOUNDS};
pub use summary::{Summary, SummaryConfig};

use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether a child has ever completed a successful write.
///
/// Starts at the configured initial value (`!suppress_initial_value`) and
/// latches to `true` on the first write; it is never reset back to `false`
/// except by explicit `unpublish`.
#[derive(Debug, Default)]
pub struct Published(AtomicBool);

impl Published {
    /// Creates a publish flag with the given initial state.
    pub fn new(initial: bool) -> Self {
        Self(AtomicBool::new(initial))
    }

    /// Reads the current state.
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Latches the flag to `true`. Idempotent.
    pub fn latch(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Explicitly marks the child unpublished.
    pub fn unpublish(&self) {
        self.0.store(false, Ordering::Release);
    }
}
