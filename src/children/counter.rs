//! Counter child: a monotonic 64-bit float with an optional exemplar.

use quanta::Instant;

use crate::error::{MetricsError, Result};
use crate::exemplar::{Exemplar, ExemplarObservation, ExemplarPool, ExemplarSlot};
use crate::atomics::AtomicF64;

use super::Published;

/// A counter: a value that only ever increases, plus one exemplar slot.
#[derive(Debug)]
pub struct Counter {
    value: AtomicF64,
    exemplar: ExemplarSlot,
    published: Published,
}

impl Counter {
    /// Creates a new counter. `exemplar_min_interval` of `None` disables
    /// exemplar rate-limiting.
    pub fn new(suppress_initial_value: bool, exemplar_min_interval: Option<std::time::Duration>) -> Self {
        Self {
            value: AtomicF64::new(0.0),
            exemplar: ExemplarSlot::new(exemplar_min_interval),
            published: Published::new(!suppress_initial_value),
        }
    }

    /// Adds `delta` to the counter. Fails if `delta` is negative. Any
    /// supplied exemplar is recorded (subject to rate-limiting) before the
    /// value is mutated.
    pub fn inc(
        &self,
        delta: f64,
        exemplar: Option<ExemplarObservation>,
        pool: &ExemplarPool,
        now: Instant,
    ) -> Result<()> {
        if delta < 0.0 {
            return Err(MetricsError::MonotonicityViolation(delta));
        }

        if let Some(obs) = exemplar {
            self.exemplar.record(pool, obs.labels, obs.value, obs.timestamp_unix_secs, now)?;
        }

        self.value.add(delta);
        self.published.latch();
        Ok(())
    }

    /// Monotonically advances the counter to `target`, leaving it unchanged
    /// if `target` is not greater than the current value.
    pub fn inc_to(&self, target: f64) {
        self.value.increment_to(target);
        self.published.latch();
    }

    /// The current value.
    pub fn value(&self) -> f64 {
        self.value.get()
    }

    /// Whether the counter has ever been successfully written.
    pub fn published(&self) -> bool {
        self.published.get()
    }

    /// Marks the counter unpublished.
    pub fn unpublish(&self) {
        self.published.unpublish()
    }

    /// Borrows the current exemplar for serialization, if present.
    pub fn borrow_exemplar(&self) -> Option<Box<Exemplar>> {
        self.exemplar.borrow()
    }

    /// Returns a previously borrowed exemplar.
    pub fn give_back_exemplar(&self, exemplar: Box<Exemplar>, pool: &ExemplarPool) {
        self.exemplar.give_back(exemplar, pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exemplar::exemplar_pool;
    use quanta::Clock;

    #[test]
    fn inc_accumulates() {
        let counter = Counter::new(false, None);
        let pool = exemplar_pool(4);
        let (clock, _mock) = Clock::mock();

        counter.inc(1.0, None, &pool, clock.now()).unwrap();
        counter.inc(2.5, None, &pool, clock.now()).unwrap();

        assert_eq!(counter.value(), 3.5);
        assert!(counter.published());
    }

    #[test]
    fn negative_delta_fails() {
        let counter = Counter::new(false, None);
        let pool = exemplar_pool(4);
        let (clock, _mock) = Clock::mock();

        let err = counter.inc(-1.0, None, &pool, clock.now()).unwrap_err();
        assert!(matches!(err, MetricsError::MonotonicityViolation(_)));
        assert_eq!(counter.value(), 0.0);
    }

    #[test]
    fn inc_to_is_monotonic() {
        let counter = Counter::new(false, None);
        counter.inc_to(5.0);
        counter.inc_to(2.0);
        assert_eq!(counter.value(), 5.0);
    }

    #[test]
    fn suppressed_initial_value_starts_unpublished() {
        let counter = Counter::new(true, None);
        assert!(!counter.published());
        let pool = exemplar_pool(4);
        let (clock, _mock) = Clock::mock();
        counter.inc(1.0, None, &pool, clock.now()).unwrap();
        assert!(counter.published());
    }
}
