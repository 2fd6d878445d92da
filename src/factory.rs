//! `MetricFactory`: a façade that bakes factory-level static labels together
//! with the registry's static labels into every collector it creates, then
//! delegates to the registry's append-only family/collector maps.
//!
//! Mirrors the shape of `metrics-exporter-prometheus`'s `Recorder`, which
//! hands callers typed handles (`metrics::Counter`/`Gauge`/`Histogram`)
//! wrapping internal storage rather than the storage itself.

use std::sync::Arc;
use std::time::Duration;

use quanta::Instant;

use crate::children::{Counter, Gauge, Histogram, Summary};
use crate::error::{MetricsError, Result};
use crate::exemplar::{ExemplarObservation, ExemplarPool};
use crate::family::{
    expect_counter, expect_gauge, expect_histogram, expect_summary, Child, Collector,
    CollectorIdentity, Family, MetricType,
};
use crate::label::{LabelNames, LabelValues};
use crate::lifetime::{Lease, LifetimeHandle};
use crate::registry::Registry;

/// A façade over [`Registry`] that combines a fixed factory-level static
/// label set with the registry's own static labels (factory labels first)
/// before creating collectors.
#[derive(Clone)]
pub struct MetricFactory {
    registry: Arc<Registry>,
    factory_names: LabelNames,
    factory_values: LabelValues,
}

impl MetricFactory {
    /// Creates a factory with no factory-level static labels.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry, factory_names: LabelNames::empty(), factory_values: LabelValues::empty() }
    }

    /// Derives a new factory whose `names`/`values` are prepended to this
    /// factory's existing static labels.
    pub fn with_labels<I, S>(&self, names: I, values: LabelValues) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = LabelNames::new(names)?;
        if names.len() != values.len() {
            return Err(MetricsError::ArityMismatch { expected: names.len(), actual: values.len() });
        }

        Ok(Self {
            registry: Arc::clone(&self.registry),
            factory_names: names.concat(&self.factory_names)?,
            factory_values: values.concat(&self.factory_values),
        })
    }

    fn combined_static(&self) -> Result<(LabelNames, LabelValues)> {
        match self.registry.static_labels() {
            Some((reg_names, reg_values)) => {
                Ok((self.factory_names.concat(&reg_names)?, self.factory_values.concat(&reg_values)))
            }
            None => Ok((self.factory_names.clone(), self.factory_values.clone())),
        }
    }

    fn reserved_label_for(metric_type: MetricType) -> Option<&'static str> {
        match metric_type {
            MetricType::Histogram => Some("le"),
            MetricType::Summary => Some("quantile"),
            MetricType::Counter | MetricType::Gauge => None,
        }
    }

    fn check_not_reserved(
        metric_type: MetricType,
        instance_names: &LabelNames,
        static_names: &LabelNames,
    ) -> Result<()> {
        if let Some(reserved) = Self::reserved_label_for(metric_type) {
            if instance_names.contains(reserved) || static_names.contains(reserved) {
                return Err(MetricsError::ReservedLabelUse(
                    reserved.to_string(),
                    metric_type.wire_name(),
                ));
            }
        }
        Ok(())
    }

    fn collector(
        &self,
        name: &str,
        metric_type: MetricType,
        help: &str,
        instance_names: LabelNames,
    ) -> Result<(Arc<Family>, Arc<Collector>)> {
        let family = self.registry.get_or_add_family(name, metric_type, help)?;
        let (static_names, static_values) = self.combined_static()?;
        Self::check_not_reserved(metric_type, &instance_names, &static_names)?;

        let identity = CollectorIdentity::new(instance_names, static_names, static_values)?;
        let collector = family.get_or_add_collector(identity);
        Ok((family, collector))
    }

    /// Returns the exemplar pool backing this factory's registry.
    pub fn exemplar_pool(&self) -> &ExemplarPool {
        self.registry.exemplar_pool()
    }

    /// The monotonic clock backing this factory's registry.
    pub fn clock(&self) -> &quanta::Clock {
        self.registry.clock()
    }

    /// Returns the counter identified by `name`/`instance_values`, creating
    /// the family, collector, and child on first use.
    pub fn counter(
        &self,
        name: &str,
        help: &str,
        instance_names: LabelNames,
        instance_values: &LabelValues,
    ) -> Result<CounterHandle> {
        let (_, collector) = self.collector(name, MetricType::Counter, help, instance_names)?;
        let config = self.registry.config();
        let (suppress, interval) = (config.suppress_initial_value, config.exemplar_min_interval);
        let child = collector
            .get_or_add_child(instance_values, || Ok(Child::Counter(Counter::new(suppress, interval))))?;
        Ok(CounterHandle(child))
    }

    /// Returns the gauge identified by `name`/`instance_values`, creating the
    /// family, collector, and child on first use.
    pub fn gauge(
        &self,
        name: &str,
        help: &str,
        instance_names: LabelNames,
        instance_values: &LabelValues,
    ) -> Result<GaugeHandle> {
        let (_, collector) = self.collector(name, MetricType::Gauge, help, instance_names)?;
        let suppress = self.registry.config().suppress_initial_value;
        let child = collector
            .get_or_add_child(instance_values, || Ok(Child::Gauge(Gauge::new(suppress))))?;
        Ok(GaugeHandle(child))
    }

    /// Returns the histogram identified by `name`/`instance_values`, creating
    /// the family, collector, and child on first use. New children use
    /// `bounds`, falling back to the registry's default bounds when empty.
    pub fn histogram(
        &self,
        name: &str,
        help: &str,
        instance_names: LabelNames,
        instance_values: &LabelValues,
        bounds: &[f64],
    ) -> Result<HistogramHandle> {
        let (_, collector) = self.collector(name, MetricType::Histogram, help, instance_names)?;
        let config = self.registry.config();
        let (suppress, interval) = (config.suppress_initial_value, config.exemplar_min_interval);
        let bounds =
            if bounds.is_empty() { config.default_histogram_bounds.as_ref() } else { bounds };
        let child = collector.get_or_add_child(instance_values, || {
            Ok(Child::Histogram(Histogram::new(bounds, suppress, interval)?))
        })?;
        Ok(HistogramHandle(child))
    }

    /// Returns the summary identified by `name`/`instance_values`, creating
    /// the family, collector, and child on first use, using the registry's
    /// default summary configuration.
    pub fn summary(
        &self,
        name: &str,
        help: &str,
        instance_names: LabelNames,
        instance_values: &LabelValues,
    ) -> Result<SummaryHandle> {
        let (_, collector) = self.collector(name, MetricType::Summary, help, instance_names)?;
        let config = self.registry.config();
        let suppress = config.suppress_initial_value;
        let summary_config = config.default_summary_config.clone();
        let now = self.registry.clock().now();
        let child = collector.get_or_add_child(instance_values, || {
            Ok(Child::Summary(Summary::new(summary_config, suppress, now)?))
        })?;
        Ok(SummaryHandle(child))
    }

    /// Returns a managed counter identified by `name`: lease acquisition via
    /// [`ManagedCounter::acquire`] creates per-label-values children on
    /// demand, and any key idle (no outstanding lease) for `expires_after`
    /// is reaped from the underlying collector by the background reaper.
    pub fn managed_counter(
        &self,
        name: &str,
        help: &str,
        instance_names: LabelNames,
        expires_after: Duration,
    ) -> Result<ManagedCounter> {
        let (_, collector) = self.collector(name, MetricType::Counter, help, instance_names)?;
        let config = self.registry.config();
        let (suppress, interval) = (config.suppress_initial_value, config.exemplar_min_interval);
        let clock = self.registry.clock().clone();
        let handle = LifetimeHandle::new(expires_after, clock, collector, move || {
            Ok(Child::Counter(Counter::new(suppress, interval)))
        });
        Ok(ManagedCounter { handle })
    }

    /// Returns a managed gauge identified by `name`. See
    /// [`MetricFactory::managed_counter`].
    pub fn managed_gauge(
        &self,
        name: &str,
        help: &str,
        instance_names: LabelNames,
        expires_after: Duration,
    ) -> Result<ManagedGauge> {
        let (_, collector) = self.collector(name, MetricType::Gauge, help, instance_names)?;
        let suppress = self.registry.config().suppress_initial_value;
        let clock = self.registry.clock().clone();
        let handle = LifetimeHandle::new(expires_after, clock, collector, move || {
            Ok(Child::Gauge(Gauge::new(suppress)))
        });
        Ok(ManagedGauge { handle })
    }

    /// Returns a managed histogram identified by `name`, using `bounds` (or
    /// the registry's default bounds when empty) for newly created
    /// children. See [`MetricFactory::managed_counter`].
    pub fn managed_histogram(
        &self,
        name: &str,
        help: &str,
        instance_names: LabelNames,
        bounds: &[f64],
        expires_after: Duration,
    ) -> Result<ManagedHistogram> {
        let (_, collector) = self.collector(name, MetricType::Histogram, help, instance_names)?;
        let config = self.registry.config();
        let (suppress, interval) = (config.suppress_initial_value, config.exemplar_min_interval);
        let bounds: Arc<[f64]> =
            if bounds.is_empty() { Arc::clone(&config.default_histogram_bounds) } else { Arc::from(bounds) };
        let clock = self.registry.clock().clone();
        let handle = LifetimeHandle::new(expires_after, clock, collector, move || {
            Ok(Child::Histogram(Histogram::new(&bounds, suppress, interval)?))
        });
        Ok(ManagedHistogram { handle })
    }

    /// Returns a managed summary identified by `name`, using the registry's
    /// default summary configuration for newly created children. See
    /// [`MetricFactory::managed_counter`].
    pub fn managed_summary(
        &self,
        name: &str,
        help: &str,
        instance_names: LabelNames,
        expires_after: Duration,
    ) -> Result<ManagedSummary> {
        let (_, collector) = self.collector(name, MetricType::Summary, help, instance_names)?;
        let config = self.registry.config();
        let suppress = config.suppress_initial_value;
        let summary_config = config.default_summary_config.clone();
        let clock = self.registry.clock().clone();
        let start = clock.now();
        let handle = LifetimeHandle::new(expires_after, clock, collector, move || {
            Ok(Child::Summary(Summary::new(summary_config.clone(), suppress, start)?))
        });
        Ok(ManagedSummary { handle })
    }
}

/// A handle to one counter child, returned by [`MetricFactory::counter`].
#[derive(Clone)]
pub struct CounterHandle(Arc<Child>);

impl CounterHandle {
    /// See [`Counter::inc`].
    pub fn inc(
        &self,
        delta: f64,
        exemplar: Option<ExemplarObservation>,
        pool: &ExemplarPool,
        now: Instant,
    ) -> Result<()> {
        expect_counter(&self.0).inc(delta, exemplar, pool, now)
    }

    /// See [`Counter::inc_to`].
    pub fn inc_to(&self, target: f64) {
        expect_counter(&self.0).inc_to(target)
    }

    /// See [`Counter::value`].
    pub fn value(&self) -> f64 {
        expect_counter(&self.0).value()
    }

    /// See [`Counter::unpublish`].
    pub fn unpublish(&self) {
        expect_counter(&self.0).unpublish()
    }
}

/// A handle to one gauge child, returned by [`MetricFactory::gauge`].
#[derive(Clone)]
pub struct GaugeHandle(Arc<Child>);

impl GaugeHandle {
    /// See [`Gauge::inc`].
    pub fn inc(&self, delta: f64) {
        expect_gauge(&self.0).inc(delta)
    }

    /// See [`Gauge::dec`].
    pub fn dec(&self, delta: f64) {
        expect_gauge(&self.0).dec(delta)
    }

    /// See [`Gauge::set`].
    pub fn set(&self, value: f64) {
        expect_gauge(&self.0).set(value)
    }

    /// See [`Gauge::value`].
    pub fn value(&self) -> f64 {
        expect_gauge(&self.0).value()
    }

    /// See [`Gauge::unpublish`].
    pub fn unpublish(&self) {
        expect_gauge(&self.0).unpublish()
    }
}

/// A handle to one histogram child, returned by [`MetricFactory::histogram`].
#[derive(Clone, Debug)]
pub struct HistogramHandle(Arc<Child>);

impl HistogramHandle {
    /// See [`Histogram::observe`].
    pub fn observe(
        &self,
        value: f64,
        count: u64,
        exemplar: Option<ExemplarObservation>,
        pool: &ExemplarPool,
        now: Instant,
    ) -> Result<()> {
        expect_histogram(&self.0).observe(value, count, exemplar, pool, now)
    }

    /// See [`Histogram::unpublish`].
    pub fn unpublish(&self) {
        expect_histogram(&self.0).unpublish()
    }
}

/// A handle to one summary child, returned by [`MetricFactory::summary`].
#[derive(Clone, Debug)]
pub struct SummaryHandle(Arc<Child>);

impl SummaryHandle {
    /// See [`Summary::observe`].
    pub fn observe(&self, value: f64, now: Instant) {
        expect_summary(&self.0).observe(value, now)
    }

    /// See [`Summary::unpublish`].
    pub fn unpublish(&self) {
        expect_summary(&self.0).unpublish()
    }
}

/// A managed counter, returned by [`MetricFactory::managed_counter`]: leasing
/// a key creates its child on demand, and the background reaper retires keys
/// idle for the handle's configured `expires_after`.
#[derive(Clone)]
pub struct ManagedCounter {
    handle: LifetimeHandle,
}

impl ManagedCounter {
    /// Takes a lease on the counter for `values`, returning the leased
    /// child alongside the [`Lease`] that keeps it alive.
    pub fn acquire(&self, values: &LabelValues) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease(values)
    }

    /// Takes a lease on the counter for a borrowed span of values.
    pub fn acquire_slice(&self, values: &[&str]) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease_slice(values)
    }

    /// Takes a lease, runs `f` against the counter, and releases the lease.
    pub fn with_lease<F, R>(&self, values: &LabelValues, f: F) -> Result<R>
    where
        F: FnOnce(&Counter) -> R,
    {
        self.handle.with_lease(values, |child| f(expect_counter(child)))
    }

    /// Takes a lease using a borrowed span of values. See
    /// [`Self::with_lease`].
    pub fn with_lease_slice<F, R>(&self, values: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(&Counter) -> R,
    {
        self.handle.with_lease_slice(values, |child| f(expect_counter(child)))
    }

    /// Number of keys currently leased or within their idle grace period.
    pub fn live_count(&self) -> usize {
        self.handle.live_count()
    }

    /// Runs one reaper sweep at `now`. See [`LifetimeHandle::sweep_once`].
    pub fn sweep_once(&self, now: Instant) -> bool {
        self.handle.sweep_once(now)
    }
}

/// A managed gauge, returned by [`MetricFactory::managed_gauge`]. See
/// [`ManagedCounter`].
#[derive(Clone)]
pub struct ManagedGauge {
    handle: LifetimeHandle,
}

impl ManagedGauge {
    /// See [`ManagedCounter::acquire`].
    pub fn acquire(&self, values: &LabelValues) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease(values)
    }

    /// See [`ManagedCounter::acquire_slice`].
    pub fn acquire_slice(&self, values: &[&str]) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease_slice(values)
    }

    /// See [`ManagedCounter::with_lease`].
    pub fn with_lease<F, R>(&self, values: &LabelValues, f: F) -> Result<R>
    where
        F: FnOnce(&Gauge) -> R,
    {
        self.handle.with_lease(values, |child| f(expect_gauge(child)))
    }

    /// See [`ManagedCounter::with_lease_slice`].
    pub fn with_lease_slice<F, R>(&self, values: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(&Gauge) -> R,
    {
        self.handle.with_lease_slice(values, |child| f(expect_gauge(child)))
    }

    /// See [`ManagedCounter::live_count`].
    pub fn live_count(&self) -> usize {
        self.handle.live_count()
    }

    /// See [`ManagedCounter::sweep_once`].
    pub fn sweep_once(&self, now: Instant) -> bool {
        self.handle.sweep_once(now)
    }
}

/// A managed histogram, returned by [`MetricFactory::managed_histogram`].
/// See [`ManagedCounter`].
#[derive(Clone)]
pub struct ManagedHistogram {
    handle: LifetimeHandle,
}

impl ManagedHistogram {
    /// See [`ManagedCounter::acquire`].
    pub fn acquire(&self, values: &LabelValues) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease(values)
    }

    /// See [`ManagedCounter::acquire_slice`].
    pub fn acquire_slice(&self, values: &[&str]) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease_slice(values)
    }

    /// See [`ManagedCounter::with_lease`].
    pub fn with_lease<F, R>(&self, values: &LabelValues, f: F) -> Result<R>
    where
        F: FnOnce(&Histogram) -> R,
    {
        self.handle.with_lease(values, |child| f(expect_histogram(child)))
    }

    /// See [`ManagedCounter::with_lease_slice`].
    pub fn with_lease_slice<F, R>(&self, values: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(&Histogram) -> R,
    {
        self.handle.with_lease_slice(values, |child| f(expect_histogram(child)))
    }

    /// See [`ManagedCounter::live_count`].
    pub fn live_count(&self) -> usize {
        self.handle.live_count()
    }

    /// See [`ManagedCounter::sweep_once`].
    pub fn sweep_once(&self, now: Instant) -> bool {
        self.handle.sweep_once(now)
    }
}

/// A managed summary, returned by [`MetricFactory::managed_summary`]. See
/// [`ManagedCounter`].
#[derive(Clone)]
pub struct ManagedSummary {
    handle: LifetimeHandle,
}

impl ManagedSummary {
    /// See [`ManagedCounter::acquire`].
    pub fn acquire(&self, values: &LabelValues) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease(values)
    }

    /// See [`ManagedCounter::acquire_slice`].
    pub fn acquire_slice(&self, values: &[&str]) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease_slice(values)
    }

    /// See [`ManagedCounter::with_lease`].
    pub fn with_lease<F, R>(&self, values: &LabelValues, f: F) -> Result<R>
    where
        F: FnOnce(&Summary) -> R,
    {
        self.handle.with_lease(values, |child| f(expect_summary(child)))
    }

    /// See [`ManagedCounter::with_lease_slice`].
    pub fn with_lease_slice<F, R>(&self, values: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(&Summary) -> R,
    {
        self.handle.with_lease_slice(values, |child| f(expect_summary(child)))
    }

    /// See [`ManagedCounter::live_count`].
    pub fn live_count(&self) -> usize {
        self.handle.live_count()
    }

    /// See [`ManagedCounter::sweep_once`].
    pub fn sweep_once(&self, now: Instant) -> bool {
        self.handle.sweep_once(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;

    fn factory() -> MetricFactory {
        MetricFactory::new(Arc::new(Registry::new(RegistryConfig::default())))
    }

    #[test]
    fn derived_factory_prepends_new_labels() {
        let base = factory().with_labels(["service"], LabelValues::new(["api"])).unwrap();
        let derived = base.with_labels(["shard"], LabelValues::new(["3"])).unwrap();

        let (names, values) = derived.combined_static().unwrap();
        assert_eq!(names.get(0), Some("shard"));
        assert_eq!(names.get(1), Some("service"));
        assert_eq!(values.get(0), Some("3"));
        assert_eq!(values.get(1), Some("api"));
    }

    #[test]
    fn counter_reuses_child_for_same_labels() {
        let factory = factory();
        let names = LabelNames::new(["method"]).unwrap();
        let values = LabelValues::new(["GET"]);

        let a = factory.counter("requests_total", "help", names.clone(), &values).unwrap();
        let b = factory.counter("requests_total", "help", names, &values).unwrap();

        a.inc_to(5.0);
        assert_eq!(b.value(), 5.0);
    }

    #[test]
    fn managed_counter_reaps_idle_keys_via_collect_and_export() {
        let (clock, mock) = quanta::Clock::mock();
        let registry = Arc::new(Registry::with_clock(RegistryConfig::default(), clock));
        let factory = MetricFactory::new(Arc::clone(&registry));

        let names = LabelNames::new(["route"]).unwrap();
        let counter = factory
            .managed_counter("hits_total", "help", names, Duration::from_secs(30))
            .unwrap();
        let key = LabelValues::new(["/health"]);

        counter.with_lease(&key, |c| c.inc_to(9.0)).unwrap();

        let mut buf = Vec::new();
        registry.collect_and_export(&mut buf, crate::format::Format::Prometheus).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("hits_total{route=\"/health\"} 9"));

        mock.increment(Duration::from_secs(31));
        counter.sweep_once(factory.clock().now());

        let mut buf = Vec::new();
        registry.collect_and_export(&mut buf, crate::format::Format::Prometheus).unwrap();
        assert!(!String::from_utf8(buf).unwrap().contains("hits_total"));
    }

    #[test]
    fn managed_gauge_shares_its_family_with_other_collectors() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let factory = MetricFactory::new(Arc::clone(&registry));

        let names = LabelNames::new(["worker"]).unwrap();
        let gauge = factory.managed_gauge("queue_depth", "help", names, Duration::from_secs(30)).unwrap();

        let key = LabelValues::new(["w1"]);
        gauge.with_lease(&key, |g| g.set(4.0)).unwrap();
        assert_eq!(gauge.with_lease(&key, |g| g.value()).unwrap(), 4.0);
    }

    #[test]
    fn histogram_rejects_le_as_instance_label() {
        let factory = factory();
        let names = LabelNames::new(["le"]).unwrap();
        let values = LabelValues::new(["1"]);

        let err = factory.histogram("latency", "help", names, &values, &[]).unwrap_err();
        assert!(matches!(err, MetricsError::ReservedLabelUse(_, _)));
    }

    #[test]
    fn summary_rejects_quantile_as_static_label() {
        let factory = factory().with_labels(["quantile"], LabelValues::new(["x"])).unwrap();
        let err = factory
            .summary("latency", "help", LabelNames::empty(), &LabelValues::empty())
            .unwrap_err();
        assert!(matches!(err, MetricsError::ReservedLabelUse(_, _)));
    }
}
