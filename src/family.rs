//! Metric families and the collectors within them.
//!
//! A family is the named, typed group sharing a metric name; a collector is
//! the set of children sharing one static-label set within that family.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::children::{Counter, Gauge, Histogram, Summary};
use crate::error::{MetricsError, Result};
use crate::exemplar::ExemplarPool;
use crate::label::{LabelNames, LabelValues};
use crate::pool::{Pool, PooledVec};

/// The metric type a family is pinned to at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    /// A monotonic counter.
    Counter,
    /// A freely adjustable gauge.
    Gauge,
    /// A fixed-bucket histogram.
    Histogram,
    /// A biased-quantile summary.
    Summary,
}

impl MetricType {
    /// The lowercase wire name of the metric type, as emitted on `# TYPE`
    /// lines.
    pub fn wire_name(self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
        }
    }
}

/// The per-label-values state for one metric type.
#[derive(Debug)]
pub enum Child {
    /// A counter child.
    Counter(Counter),
    /// A gauge child.
    Gauge(Gauge),
    /// A histogram child.
    Histogram(Histogram),
    /// A summary child.
    Summary(Summary),
}

impl Child {
    /// Whether the child has ever been successfully written.
    pub fn published(&self) -> bool {
        match self {
            Child::Counter(c) => c.published(),
            Child::Gauge(g) => g.published(),
            Child::Histogram(h) => h.published(),
            Child::Summary(s) => s.published(),
        }
    }
}

/// Unwraps a [`Child::Counter`], panicking if the family's metric type
/// invariant (pinned at creation) has somehow been violated.
pub(crate) fn expect_counter(child: &Child) -> &Counter {
    match child {
        Child::Counter(c) => c,
        _ => unreachable!("family metric type pinned at creation"),
    }
}

/// Unwraps a [`Child::Gauge`]. See [`expect_counter`].
pub(crate) fn expect_gauge(child: &Child) -> &Gauge {
    match child {
        Child::Gauge(g) => g,
        _ => unreachable!("family metric type pinned at creation"),
    }
}

/// Unwraps a [`Child::Histogram`]. See [`expect_counter`].
pub(crate) fn expect_histogram(child: &Child) -> &Histogram {
    match child {
        Child::Histogram(h) => h,
        _ => unreachable!("family metric type pinned at creation"),
    }
}

/// Unwraps a [`Child::Summary`]. See [`expect_counter`].
pub(crate) fn expect_summary(child: &Child) -> &Summary {
    match child {
        Child::Summary(s) => s,
        _ => unreachable!("family metric type pinned at creation"),
    }
}

/// The identity of a collector within a family: the flattened (instance,
/// static) label-name set must be unique, and duplicates across the two
/// levels are rejected at construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectorIdentity {
    instance_names: LabelNames,
    static_names: LabelNames,
    static_values: LabelValues,
}

impl CollectorIdentity {
    /// Builds an identity, validating that instance and static label names
    /// do not collide.
    pub fn new(
        instance_names: LabelNames,
        static_names: LabelNames,
        static_values: LabelValues,
    ) -> Result<Self> {
        if static_names.len() != static_values.len() {
            return Err(MetricsError::ArityMismatch {
                expected: static_names.len(),
                actual: static_values.len(),
            });
        }
        instance_names.concat(&static_names)?;
        Ok(Self { instance_names, static_names, static_values })
    }

    /// The declared instance label names.
    pub fn instance_names(&self) -> &LabelNames {
        &self.instance_names
    }

    /// The static label names attached to every child of this collector.
    pub fn static_names(&self) -> &LabelNames {
        &self.static_names
    }

    /// The static label values attached to every child of this collector.
    pub fn static_values(&self) -> &LabelValues {
        &self.static_values
    }
}

/// Within a family, the set of children sharing one static-label set.
#[derive(Debug)]
pub struct Collector {
    identity: CollectorIdentity,
    children: RwLock<IndexMap<LabelValues, Arc<Child>>>,
}

impl Collector {
    pub(crate) fn new(identity: CollectorIdentity) -> Self {
        Self { identity, children: RwLock::new(IndexMap::new()) }
    }

    /// The collector's identity.
    pub fn identity(&self) -> &CollectorIdentity {
        &self.identity
    }

    /// Returns the child for `values`, constructing it with `make` on first
    /// request. Fails if `values` does not match the declared instance-label
    /// arity.
    pub fn get_or_add_child<F>(&self, values: &LabelValues, make: F) -> Result<Arc<Child>>
    where
        F: FnOnce() -> Result<Child>,
    {
        if values.len() != self.identity.instance_names.len() {
            return Err(MetricsError::ArityMismatch {
                expected: self.identity.instance_names.len(),
                actual: values.len(),
            });
        }

        if let Some(child) = self.children.read().get(values) {
            return Ok(Arc::clone(child));
        }

        let mut children = self.children.write();
        if let Some(child) = children.get(values) {
            return Ok(Arc::clone(child));
        }

        let child = Arc::new(make()?);
        children.insert(values.clone(), Arc::clone(&child));
        Ok(child)
    }

    /// Looks up an existing child without creating one.
    pub fn get_child(&self, values: &LabelValues) -> Option<Arc<Child>> {
        self.children.read().get(values).cloned()
    }

    /// Removes the child keyed by `values`, if any.
    pub fn remove_labelled(&self, values: &LabelValues) -> bool {
        self.children.write().shift_remove(values).is_some()
    }

    /// Snapshots the current `(label values, child)` pairs in insertion
    /// order, for collection. The returned vector is rented from `pool` and
    /// returned to it when the caller drops the snapshot.
    pub fn snapshot_children<'a>(
        &self,
        pool: &'a Pool<Vec<(LabelValues, Arc<Child>)>>,
    ) -> PooledVec<'a, (LabelValues, Arc<Child>)> {
        let mut snapshot = PooledVec::new(pool);
        snapshot.extend(self.children.read().iter().map(|(k, v)| (k.clone(), Arc::clone(v))));
        snapshot
    }
}

/// The named, typed group of collectors sharing a metric name.
#[derive(Debug)]
pub struct Family {
    name: Arc<str>,
    help: Arc<str>,
    metric_type: MetricType,
    collectors: RwLock<Vec<Arc<Collector>>>,
}

impl Family {
    pub(crate) fn new(name: Arc<str>, help: Arc<str>, metric_type: MetricType) -> Self {
        Self { name, help, metric_type, collectors: RwLock::new(Vec::new()) }
    }

    /// The family's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The family's help text.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// The metric type every collector in this family shares.
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Returns the collector for `identity`, constructing it on first
    /// request.
    pub fn get_or_add_collector(&self, identity: CollectorIdentity) -> Arc<Collector> {
        if let Some(existing) =
            self.collectors.read().iter().find(|c| c.identity == identity).cloned()
        {
            return existing;
        }

        let mut collectors = self.collectors.write();
        if let Some(existing) = collectors.iter().find(|c| c.identity == identity).cloned() {
            return existing;
        }

        let collector = Arc::new(Collector::new(identity));
        collectors.push(Arc::clone(&collector));
        collector
    }

    /// Snapshots the current collector list, in insertion order, for
    /// collection. The returned vector is rented from `pool` and returned to
    /// it when the caller drops the snapshot.
    pub fn snapshot_collectors<'a>(
        &self,
        pool: &'a Pool<Vec<Arc<Collector>>>,
    ) -> PooledVec<'a, Arc<Collector>> {
        let mut snapshot = PooledVec::new(pool);
        snapshot.extend(self.collectors.read().iter().cloned());
        snapshot
    }
}

/// The pools threaded through a single collection pass: exemplar objects,
/// rendering line buffers, and the two snapshot-vector shapes produced while
/// walking a family's collectors and a collector's children. Bundled so
/// `write_registry` and its callees take one parameter instead of four.
pub struct CollectPools {
    /// Pooled exemplar allocations.
    pub exemplar: ExemplarPool,
    /// Pooled `String` scratch buffers used while rendering one point line.
    pub lines: Pool<String>,
    /// Pooled child-snapshot vectors, shared by every collector.
    pub children: Pool<Vec<(LabelValues, Arc<Child>)>>,
    /// Pooled collector-snapshot vectors, shared by every family.
    pub collectors: Pool<Vec<Arc<Collector>>>,
    /// Pooled family-snapshot vectors, used once per collect.
    pub families: Pool<Vec<Arc<Family>>>,
}

impl CollectPools {
    /// Builds the pool set backing one registry's collection passes.
    pub fn new(exemplar: ExemplarPool) -> Self {
        Self {
            exemplar,
            lines: Pool::new(16, 4096, |s| s.capacity(), String::new),
            children: Pool::new(16, 256, |v| v.capacity(), Vec::new),
            collectors: Pool::new(16, 64, |v| v.capacity(), Vec::new),
            families: Pool::new(4, 64, |v| v.capacity(), Vec::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_static_instance_name_collision() {
        let instance = LabelNames::new(["a"]).unwrap();
        let static_names = LabelNames::new(["a"]).unwrap();
        let static_values = LabelValues::new(["x"]);

        assert!(CollectorIdentity::new(instance, static_names, static_values).is_err());
    }

    #[test]
    fn get_or_add_collector_reuses_matching_identity() {
        let family = Family::new(Arc::from("requests"), Arc::from(""), MetricType::Counter);
        let identity = CollectorIdentity::new(
            LabelNames::new(["method"]).unwrap(),
            LabelNames::empty(),
            LabelValues::empty(),
        )
        .unwrap();

        let a = family.get_or_add_collector(identity.clone());
        let b = family.get_or_add_collector(identity);
        assert!(Arc::ptr_eq(&a, &b));

        let pool = Pool::new(4, 64, |v: &Vec<Arc<Collector>>| v.capacity(), Vec::new);
        assert_eq!(family.snapshot_collectors(&pool).len(), 1);
    }

    #[test]
    fn get_or_add_child_rejects_arity_mismatch() {
        let identity = CollectorIdentity::new(
            LabelNames::new(["method"]).unwrap(),
            LabelNames::empty(),
            LabelValues::empty(),
        )
        .unwrap();
        let collector = Collector::new(identity);

        let values = LabelValues::new(["GET", "extra"]);
        let err = collector.get_or_add_child(&values, || Ok(Child::Gauge(Gauge::new(false)))).unwrap_err();
        assert!(matches!(err, MetricsError::ArityMismatch { .. }));
    }

    #[test]
    fn remove_labelled_erases_child_state() {
        let identity = CollectorIdentity::new(
            LabelNames::new(["method"]).unwrap(),
            LabelNames::empty(),
            LabelValues::empty(),
        )
        .unwrap();
        let collector = Collector::new(identity);
        let values = LabelValues::new(["GET"]);

        collector.get_or_add_child(&values, || Ok(Child::Gauge(Gauge::new(false)))).unwrap();
        assert!(collector.remove_labelled(&values));
        assert!(collector.get_child(&values).is_none());
    }
}
