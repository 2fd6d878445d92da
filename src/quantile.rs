//! The Cormode-Korn-Muthukrishnan biased-quantile sketch backing summary
//! metrics.
//!
//! This is not adapted from anything in the surrounding corpus: the
//! corpus's own `Summary` type is backed by a DDSketch, a different
//! algorithm with different error guarantees. This module is written
//! directly from the biased-quantile invariant function and the
//! insert-and-compress merge procedure, in the corpus's general style for
//! small `Vec`-backed data structures (no external sketch crate).

use std::sync::Arc;

/// A `(quantile, epsilon)` target: the desired quantile and its acceptable
/// rank error.
pub type Target = (f64, f64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tuple {
    value: f64,
    g: u64,
    delta: u64,
}

/// A single biased-quantile stream. Samples are merged in batches; querying
/// a quantile walks the compressed tuple list for the smallest value whose
/// cumulative rank covers the target.
#[derive(Clone, Debug)]
pub struct QuantileStream {
    targets: Arc<[Target]>,
    tuples: Vec<Tuple>,
    n: u64,
}

impl QuantileStream {
    /// Creates an empty stream over the given `(quantile, epsilon)` targets.
    pub fn new(targets: Arc<[Target]>) -> Self {
        Self { targets, tuples: Vec::new(), n: 0 }
    }

    /// Total number of samples merged into this stream so far.
    pub fn count(&self) -> u64 {
        self.n
    }

    /// Whether the stream has never had a sample merged into it.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Resets the stream to empty, keeping its configured targets.
    pub fn reset(&mut self) {
        self.tuples.clear();
        self.n = 0;
    }

    fn invariant(&self, r: f64) -> f64 {
        let n = self.n as f64;
        self.targets
            .iter()
            .map(|&(q, eps)| {
                if q * n <= r {
                    (2.0 * eps * r) / q
                } else {
                    (2.0 * eps * (n - r)) / (1.0 - q)
                }
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Merges a batch of samples into the stream: sorts the batch, walks
    /// existing and incoming samples in a single pass inserting each new
    /// sample at its rank with the maximal tolerated error width, then
    /// compresses neighboring tuples where doing so stays within the error
    /// bound.
    pub fn merge(&mut self, mut batch: Vec<f64>) {
        if batch.is_empty() {
            return;
        }
        batch.retain(|v| !v.is_nan());
        if batch.is_empty() {
            return;
        }
        batch.sort_by(|a, b| a.partial_cmp(b).expect("NaN filtered above"));

        let existing = std::mem::take(&mut self.tuples);
        let mut merged = Vec::with_capacity(existing.len() + batch.len());
        let mut existing = existing.into_iter().peekable();
        let mut incoming = batch.into_iter().peekable();
        let mut rank: u64 = 0;

        while let Some(&v) = incoming.peek() {
            while let Some(t) = existing.peek() {
                if t.value <= v {
                    let t = existing.next().unwrap();
                    rank += t.g;
                    merged.push(t);
                } else {
                    break;
                }
            }

            let v = incoming.next().unwrap();
            self.n += 1;

            let at_boundary = merged.is_empty() && existing.peek().is_none();
            let (g, delta) = if at_boundary {
                (1, 0)
            } else {
                let band = self.invariant(rank as f64).floor();
                let band = if band.is_finite() && band >= 1.0 { band as u64 - 1 } else { 0 };
                (1, band)
            };

            merged.push(Tuple { value: v, g, delta });
            rank += 1;
        }

        for t in existing {
            merged.push(t);
        }

        self.tuples = merged;
        self.compress();
    }

    fn compress(&mut self) {
        let len = self.tuples.len();
        if len < 3 {
            return;
        }

        let mut rank = vec![0u64; len];
        let mut acc = 0u64;
        for (i, t) in self.tuples.iter().enumerate() {
            rank[i] = acc;
            acc += t.g;
        }

        let mut keep = vec![true; len];
        let mut i = len - 2;
        loop {
            if i > 0 && keep[i] {
                let mut j = i + 1;
                while j < len && !keep[j] {
                    j += 1;
                }
                if j < len {
                    let band = self.invariant(rank[i] as f64).floor();
                    let band = if band.is_finite() && band >= 0.0 { band as u64 } else { 0 };
                    if self.tuples[i].g + self.tuples[j].g + self.tuples[j].delta <= band {
                        self.tuples[j].g += self.tuples[i].g;
                        keep[i] = false;
                    }
                }
            }
            if i == 0 {
                break;
            }
            i -= 1;
        }

        let mut compact = Vec::with_capacity(len);
        for (idx, t) in self.tuples.iter().enumerate() {
            if keep[idx] {
                compact.push(*t);
            }
        }
        self.tuples = compact;
    }

    /// Returns the smallest value whose cumulative rank covers `ceil(q * N)`,
    /// or `None` if the stream holds no samples. For a stream that has not
    /// yet undergone any compression (small `N`), every tuple has `g = 1`
    /// and this degenerates to indexing the sorted sample list directly.
    pub fn query(&self, q: f64) -> Option<f64> {
        if self.tuples.is_empty() {
            return None;
        }

        let target_rank = ((q * self.n as f64).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for t in &self.tuples {
            cumulative += t.g;
            if cumulative >= target_rank {
                return Some(t.value);
            }
        }

        self.tuples.last().map(|t| t.value)
    }
}
