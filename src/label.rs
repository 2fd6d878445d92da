//! Immutable, hash-precomputed sequences of label names and values.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use crate::error::{MetricsError, Result};
use crate::naming::validate_label_name;
use crate::pool::Pool;

/// The pooled hash sets backing duplicate-name detection in [`LabelNames::new`]
/// and [`LabelNames::concat`], so validating a label-name set doesn't
/// allocate a fresh `HashSet` per call.
fn dedup_set_pool() -> &'static Pool<HashSet<Arc<str>>> {
    static POOL: OnceLock<Pool<HashSet<Arc<str>>>> = OnceLock::new();
    POOL.get_or_init(|| Pool::new(16, 64, |s| s.capacity(), HashSet::new))
}

/// Returns the first name in `items` that appears more than once, if any.
fn first_duplicate(items: &[Arc<str>]) -> Option<Arc<str>> {
    let pool = dedup_set_pool();
    let mut seen = pool.take();
    seen.clear();

    let dup = items.iter().find(|item| !seen.insert(Arc::clone(item))).cloned();

    pool.give(seen);
    dup
}

fn mix_hash(items: &[Arc<str>]) -> u64 {
    // FNV-1a over the ordinal bytes of each element, folded with its index so
    // that sequences of equal elements in different positions still hash
    // differently. This is precomputed once at construction and never
    // recomputed on access.
    let mut hash: u64 = 0xcbf29ce484222325;
    for (idx, item) in items.iter().enumerate() {
        hash ^= idx as u64;
        hash = hash.wrapping_mul(0x100000001b3);
        for byte in item.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

/// An immutable, ordered sequence of label names.
///
/// Equality and hashing are structural: two sequences are equal iff they
/// have the same length and pairwise byte-identical elements, in order.
#[derive(Clone, Debug, Eq)]
pub struct LabelNames {
    items: Arc<[Arc<str>]>,
    hash: u64,
}

impl LabelNames {
    /// Creates an empty label name sequence.
    pub fn empty() -> Self {
        Self { items: Arc::from(Vec::new()), hash: mix_hash(&[]) }
    }

    /// Creates a label name sequence from an iterator of names, validating
    /// each name and rejecting duplicates.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items: Vec<Arc<str>> = names.into_iter().map(|s| Arc::from(s.as_ref())).collect();

        for name in &items {
            validate_label_name(name)?;
        }

        if let Some(dup) = first_duplicate(&items) {
            return Err(MetricsError::LabelCollision(dup.to_string()));
        }

        let hash = mix_hash(&items);
        Ok(Self { items: Arc::from(items), hash })
    }

    /// Number of names in the sequence.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether `name` is present in the sequence.
    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|n| n.as_ref() == name)
    }

    /// Returns the name at position `i`, if any.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.items.get(i).map(|s| s.as_ref())
    }

    /// Iterates over the names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|s| s.as_ref())
    }

    /// Concatenates `self` and `other`, validating the union contains no
    /// duplicate names.
    pub fn concat(&self, other: &LabelNames) -> Result<LabelNames> {
        let items: Vec<Arc<str>> =
            self.items.iter().cloned().chain(other.items.iter().cloned()).collect();

        if let Some(dup) = first_duplicate(&items) {
            return Err(MetricsError::LabelCollision(dup.to_string()));
        }

        let hash = mix_hash(&items);
        Ok(Self { items: Arc::from(items), hash })
    }
}

impl PartialEq for LabelNames {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.items.len() == other.items.len()
            && self.items.iter().zip(other.items.iter()).all(|(a, b)| a == b)
    }
}

impl Hash for LabelNames {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// An immutable, ordered sequence of label values, positionally aligned with
/// a [`LabelNames`] sequence of the same length.
#[derive(Clone, Debug, Eq)]
pub struct LabelValues {
    items: Arc<[Arc<str>]>,
    hash: u64,
}

impl LabelValues {
    /// Creates an empty label value sequence.
    pub fn empty() -> Self {
        Self { items: Arc::from(Vec::new()), hash: mix_hash(&[]) }
    }

    /// Creates a label value sequence from an iterator of values. Values are
    /// not validated: Prometheus label values accept arbitrary UTF-8.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items: Vec<Arc<str>> = values.into_iter().map(|s| Arc::from(s.as_ref())).collect();
        let hash = mix_hash(&items);
        Self { items: Arc::from(items), hash }
    }

    /// Builds a label value sequence from borrowed string slices without an
    /// intermediate allocation per caller-held value, for hot-path lookups.
    pub fn from_slice(values: &[&str]) -> Self {
        Self::new(values.iter().copied())
    }

    /// Number of values in the sequence.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the value at position `i`, if any.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.items.get(i).map(|s| s.as_ref())
    }

    /// Iterates over the values in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|s| s.as_ref())
    }

    /// Concatenates `self` and `other` in that order.
    pub fn concat(&self, other: &LabelValues) -> LabelValues {
        let items: Vec<Arc<str>> =
            self.items.iter().cloned().chain(other.items.iter().cloned()).collect();
        let hash = mix_hash(&items);
        Self { items: Arc::from(items), hash }
    }
}

impl PartialEq for LabelValues {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.items.len() == other.items.len()
            && self.items.iter().zip(other.items.iter()).all(|(a, b)| a == b)
    }
}

impl Hash for LabelValues {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality_implies_equal_hash() {
        use std::collections::hash_map::DefaultHasher;

        let a = LabelValues::new(["x", "y"]);
        let b = LabelValues::new(["x", "y"]);
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        a.hash(&mut ha);
        let mut hb = DefaultHasher::new();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn distinct_order_is_distinct() {
        let a = LabelValues::new(["x", "y"]);
        let b = LabelValues::new(["y", "x"]);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_duplicate_names() {
        assert!(LabelNames::new(["a", "a"]).is_err());
    }

    #[test]
    fn dedup_set_pool_is_reused_without_leaking_state_across_calls() {
        assert!(LabelNames::new(["a", "a"]).is_err());
        // A pooled set that failed to clear between rentals would spuriously
        // reject this disjoint, duplicate-free set.
        assert!(LabelNames::new(["b", "c"]).is_ok());
    }

    #[test]
    fn rejects_reserved_name() {
        assert!(LabelNames::new(["__reserved"]).is_err());
    }

    #[test]
    fn concat_preserves_order() {
        let names = LabelNames::new(["a"]).unwrap();
        let other = LabelNames::new(["b"]).unwrap();
        let combined = names.concat(&other).unwrap();
        assert_eq!(combined.get(0), Some("a"));
        assert_eq!(combined.get(1), Some("b"));
    }

    #[test]
    fn concat_rejects_collision() {
        let names = LabelNames::new(["a"]).unwrap();
        let other = LabelNames::new(["a"]).unwrap();
        assert!(names.concat(&other).is_err());
    }
}
