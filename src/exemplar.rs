//! The exemplar store: a pooled, single-slot observation annotation attached
//! to a counter or to one histogram bucket.
//!
//! The slot is a raw `AtomicPtr` rather than a `Mutex`. Every operation that
//! touches the pointer (`record`, `borrow`, the successful branch of
//! `give_back`) claims the previous occupant via an atomic swap or a
//! compare-and-swap off the null sentinel, so at most one owner ever holds a
//! given allocation at a time. Nothing here needs epoch-based reclamation:
//! unlike a structure with concurrent readers of a shared pointer, a slot
//! never has two threads dereferencing the same value at once.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Instant;

use crate::error::{MetricsError, Result};
use crate::pool::Pool;

const MAX_EXEMPLAR_RUNES: usize = 128;

/// A small annotation attached to an observation: a handful of label pairs,
/// the observed value, and a Unix-epoch timestamp.
#[derive(Debug, Clone, Default)]
pub struct Exemplar {
    labels: Vec<(Box<str>, Box<str>)>,
    value: f64,
    timestamp_unix_secs: f64,
}

impl Exemplar {
    fn empty() -> Self {
        Self::default()
    }

    fn fill(&mut self, labels: Vec<(Box<str>, Box<str>)>, value: f64, timestamp_unix_secs: f64) {
        self.labels = labels;
        self.value = value;
        self.timestamp_unix_secs = timestamp_unix_secs;
    }

    /// The exemplar's label pairs, in the order supplied at record time.
    pub fn labels(&self) -> &[(Box<str>, Box<str>)] {
        &self.labels
    }

    /// The observed value carried alongside the labels.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Unix-epoch seconds at which the observation was recorded.
    pub fn timestamp_unix_secs(&self) -> f64 {
        self.timestamp_unix_secs
    }
}

/// The caller-supplied observation passed to a counter or histogram write
/// when attaching an exemplar.
pub struct ExemplarObservation {
    /// The exemplar's label pairs.
    pub labels: Vec<(Box<str>, Box<str>)>,
    /// The observed value.
    pub value: f64,
    /// Unix-epoch seconds at which the observation occurred.
    pub timestamp_unix_secs: f64,
}

fn validate_exemplar_labels(labels: &[(Box<str>, Box<str>)]) -> Result<()> {
    let mut rune_count = 0usize;
    for (i, (key, value)) in labels.iter().enumerate() {
        rune_count += key.chars().count() + value.chars().count();
        if labels[..i].iter().any(|(other_key, _)| other_key == key) {
            return Err(MetricsError::ExemplarInvalid("duplicate exemplar label key"));
        }
    }

    if rune_count > MAX_EXEMPLAR_RUNES {
        return Err(MetricsError::ExemplarInvalid("exemplar exceeds the 128 rune budget"));
    }

    Ok(())
}

/// The free list exemplar slots rent `Exemplar` allocations from and return
/// them to.
pub type ExemplarPool = Pool<Box<Exemplar>>;

/// Builds an exemplar pool capped at `max_pooled` entries.
pub fn exemplar_pool(max_pooled: usize) -> ExemplarPool {
    Pool::new(max_pooled, 64, |e| e.labels.len(), || Box::new(Exemplar::empty()))
}

/// A single-slot, lock-free exemplar annotation shared between the writer
/// that records observations and the serializer that borrows the current
/// value for rendering.
#[derive(Debug)]
pub struct ExemplarSlot {
    slot: AtomicPtr<Exemplar>,
    min_interval: Option<Duration>,
    last_recorded: Mutex<Option<Instant>>,
}

impl ExemplarSlot {
    /// Creates an empty slot. `min_interval` of `None` or `Duration::ZERO`
    /// disables rate-limiting.
    pub fn new(min_interval: Option<Duration>) -> Self {
        Self { slot: AtomicPtr::new(ptr::null_mut()), min_interval, last_recorded: Mutex::new(None) }
    }

    fn should_record(&self, now: Instant) -> bool {
        let interval = match self.min_interval {
            Some(d) if !d.is_zero() => d,
            _ => return true,
        };

        let mut last = self.last_recorded.lock();
        match *last {
            Some(prev) if now < prev + interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Records a new exemplar into the slot, subject to rate-limiting and
    /// label validation. Any exemplar displaced from the slot, and any
    /// exemplar rejected by validation, is returned to `pool`.
    pub fn record(
        &self,
        pool: &ExemplarPool,
        labels: Vec<(Box<str>, Box<str>)>,
        value: f64,
        timestamp_unix_secs: f64,
        now: Instant,
    ) -> Result<()> {
        if !self.should_record(now) {
            return Ok(());
        }

        if let Err(err) = validate_exemplar_labels(&labels) {
            return Err(err);
        }

        let mut rented = pool.take();
        rented.fill(labels, value, timestamp_unix_secs);

        let raw = Box::into_raw(rented);
        let previous = self.slot.swap(raw, Ordering::AcqRel);
        if !previous.is_null() {
            pool.give(unsafe { Box::from_raw(previous) });
        }

        Ok(())
    }

    /// Atomically exchanges the slot with the empty sentinel, handing
    /// exclusive ownership of whatever was there to the caller.
    pub fn borrow(&self) -> Option<Box<Exemplar>> {
        let previous = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
        if previous.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(previous) })
        }
    }

    /// Returns a previously borrowed exemplar to the slot, unless a fresher
    /// one has since been recorded, in which case it is discarded to `pool`.
    pub fn give_back(&self, exemplar: Box<Exemplar>, pool: &ExemplarPool) {
        let raw = Box::into_raw(exemplar);
        if let Err(raw) =
            self.slot.compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Relaxed)
        {
            pool.give(unsafe { Box::from_raw(raw) });
        }
    }

    #[cfg(test)]
    fn peek_value(&self) -> Option<f64> {
        let borrowed = self.borrow()?;
        let value = borrowed.value();
        // Not returning the borrow is fine in tests: the slot is local and
        // dropped at the end of the test.
        Some(value)
    }
}

impl Drop for ExemplarSlot {
    fn drop(&mut self) {
        let raw = *self.slot.get_mut();
        if !raw.is_null() {
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}
