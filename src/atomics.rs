//! Lock-free atomic numeric cells.
//!
//! Both cells are backed by a 64-bit atomic integer holding the bit pattern
//! of the logical value (for the float cell) or the value itself (for the
//! integer cell), following the CAS-loop discipline used throughout the
//! corpus's own atomic `GaugeFn`/`CounterFn` implementations.

use std::sync::atomic::Ordering;

#[cfg(target_has_atomic = "64")]
use std::sync::atomic::AtomicU64;
#[cfg(not(target_has_atomic = "64"))]
use portable_atomic::AtomicU64;

/// A lock-free 64-bit floating point cell.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Creates a new cell initialized to `value`.
    pub fn new(value: f64) -> Self {
        Self { bits: AtomicU64::new(value.to_bits()) }
    }

    /// Loads the current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Sets the value unconditionally.
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Adds `delta` to the current value via a CAS loop.
    pub fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let updated = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Monotonically advances the cell to `target` if `target` is strictly
    /// greater than the current value. A `NaN` target is ignored. Returns
    /// whether the cell was updated.
    pub fn increment_to(&self, target: f64) -> bool {
        if target.is_nan() {
            return false;
        }

        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            if target <= f64::from_bits(current) {
                return false;
            }

            match self.bits.compare_exchange_weak(
                current,
                target.to_bits(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Monotonically lowers the cell to `target` if `target` is strictly
    /// less than the current value. A `NaN` target is ignored. Returns
    /// whether the cell was updated.
    pub fn decrement_to(&self, target: f64) -> bool {
        if target.is_nan() {
            return false;
        }

        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            if target >= f64::from_bits(current) {
                return false;
            }

            match self.bits.compare_exchange_weak(
                current,
                target.to_bits(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

/// A lock-free monotonic 64-bit unsigned integer cell, used for histogram
/// bucket-local observation counts.
#[derive(Debug, Default)]
pub struct AtomicCounterU64 {
    value: AtomicU64,
}

impl AtomicCounterU64 {
    /// Creates a new cell initialized to zero.
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    /// Loads the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Sets the value unconditionally.
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    /// Adds `delta` to the current value.
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::AcqRel);
    }

    /// Monotonically advances the cell to `target` if `target` is strictly
    /// greater than the current value. Returns whether the cell was updated.
    pub fn increment_to(&self, target: u64) -> bool {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            if target <= current {
                return false;
            }

            match self.value.compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates() {
        let cell = AtomicF64::new(0.0);
        cell.add(1.0);
        cell.add(2.5);
        assert_eq!(cell.get(), 3.5);
    }

    #[test]
    fn increment_to_is_monotonic() {
        let cell = AtomicF64::new(5.0);
        assert!(!cell.increment_to(3.0));
        assert_eq!(cell.get(), 5.0);
        assert!(cell.increment_to(10.0));
        assert_eq!(cell.get(), 10.0);
    }

    #[test]
    fn increment_to_ignores_nan() {
        let cell = AtomicF64::new(5.0);
        assert!(!cell.increment_to(f64::NAN));
        assert_eq!(cell.get(), 5.0);
    }

    #[test]
    fn decrement_to_is_monotonic() {
        let cell = AtomicF64::new(5.0);
        assert!(!cell.decrement_to(10.0));
        assert!(cell.decrement_to(1.0));
        assert_eq!(cell.get(), 1.0);
    }

    #[test]
    fn counter_accumulates() {
        let cell = AtomicCounterU64::new();
        cell.add(3);
        cell.add(4);
        assert_eq!(cell.get(), 7);
    }

    #[test]
    fn counter_set_overrides() {
        let cell = AtomicCounterU64::new();
        cell.add(9);
        cell.set(2);
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn counter_increment_to_is_monotonic() {
        let cell = AtomicCounterU64::new();
        cell.set(5);
        assert!(!cell.increment_to(3));
        assert_eq!(cell.get(), 5);
        assert!(cell.increment_to(10));
        assert_eq!(cell.get(), 10);
    }
}
