//! Managed-lifetime handles: lease-counted children backed by a background
//! reaper, reworked from `metrics_util::registry::Recency`'s
//! idle-timeout-on-read generation tracking into lease-counted-on-write.
//!
//! A [`LifetimeHandle`] wraps a real [`Collector`]: leasing a key creates its
//! child through the collector's own `get_or_add_child` (so a managed metric
//! is collected and rendered exactly like any other family member), while
//! the handle's own lease bookkeeping tracks which keys are idle. On a write
//! path a caller takes a [`Lease`], holds it for the duration of the write,
//! and drops it, which marks the key as keepalive-fresh. A background task
//! reaps keys that have gone idle (`lease_count == 0` for at least
//! `expires_after`) since the last write, removing the backing child via
//! [`Collector::remove_labelled`] so it stops being collected.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use quanta::{Clock, Instant};

use crate::children::{Counter, Gauge};
use crate::error::{MetricsError, Result};
use crate::family::{expect_counter, expect_gauge, Child, Collector};
use crate::label::LabelValues;

struct LifetimeInfo {
    lease_count: AtomicUsize,
    keepalive: Mutex<Instant>,
    ended: AtomicBool,
}

impl LifetimeInfo {
    fn new(now: Instant) -> Self {
        Self { lease_count: AtomicUsize::new(0), keepalive: Mutex::new(now), ended: AtomicBool::new(false) }
    }

    fn is_expired(&self, now: Instant, expires_after: Duration) -> bool {
        self.lease_count.load(Ordering::Acquire) == 0 && now >= *self.keepalive.lock() + expires_after
    }
}

/// A lease on one key's child. Dropping it decrements the lease count and
/// refreshes the keepalive timestamp; if the entry had already been reaped
/// out from under it (a renewal/expiration race), dropping the lease
/// re-registers a fresh lifetime for the same key.
pub struct Lease {
    handle: LifetimeHandle,
    values: LabelValues,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("values", &self.values).finish_non_exhaustive()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.handle.release(&self.values);
    }
}

struct Shared {
    expires_after: Duration,
    clock: Clock,
    collector: Arc<Collector>,
    make: Box<dyn Fn() -> Result<Child> + Send + Sync>,
    lifetimes: RwLock<HashMap<LabelValues, Arc<LifetimeInfo>>>,
    reaper_running: AtomicBool,
}

/// A lease-counted view over one [`Collector`]'s children, reaped by a
/// background task once a key has gone idle for `expires_after`.
#[derive(Clone)]
pub struct LifetimeHandle {
    shared: Arc<Shared>,
}

impl LifetimeHandle {
    /// Creates a handle over `collector` whose children are built with
    /// `make` on first lease and reaped from the collector `expires_after`
    /// after their last release, once idle.
    pub fn new<F>(expires_after: Duration, clock: Clock, collector: Arc<Collector>, make: F) -> Self
    where
        F: Fn() -> Result<Child> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                expires_after,
                clock,
                collector,
                make: Box::new(make),
                lifetimes: RwLock::new(HashMap::new()),
                reaper_running: AtomicBool::new(false),
            }),
        }
    }

    fn child_for(&self, values: &LabelValues) -> Result<Arc<Child>> {
        self.shared.collector.get_or_add_child(values, || (self.shared.make)())
    }

    fn lifetime_for(&self, values: &LabelValues, now: Instant) -> Arc<LifetimeInfo> {
        if let Some(info) = self.shared.lifetimes.read().get(values) {
            return Arc::clone(info);
        }
        let mut lifetimes = self.shared.lifetimes.write();
        if let Some(info) = lifetimes.get(values) {
            return Arc::clone(info);
        }
        let info = Arc::new(LifetimeInfo::new(now));
        lifetimes.insert(values.clone(), Arc::clone(&info));
        info
    }

    /// Takes a lease on the child for `values`, creating it on first use,
    /// and ensures a reaper task is running for this handle.
    pub fn acquire_lease(&self, values: &LabelValues) -> Result<(Arc<Child>, Lease)> {
        let now = self.shared.clock.now();
        let child = self.child_for(values)?;
        let info = self.lifetime_for(values, now);
        info.lease_count.fetch_add(1, Ordering::AcqRel);

        #[cfg(feature = "async-runtime")]
        self.ensure_reaper_running();

        Ok((child, Lease { handle: self.clone(), values: values.clone() }))
    }

    /// Takes a lease on the child for `values` given as a borrowed span,
    /// without requiring the caller to build an owned [`LabelValues`] first.
    pub fn acquire_lease_slice(&self, values: &[&str]) -> Result<(Arc<Child>, Lease)> {
        self.acquire_lease(&LabelValues::from_slice(values))
    }

    /// Takes a lease, runs `f` against the leased child, and releases the
    /// lease before returning.
    pub fn with_lease<F, R>(&self, values: &LabelValues, f: F) -> Result<R>
    where
        F: FnOnce(&Child) -> R,
    {
        let (child, _lease) = self.acquire_lease(values)?;
        Ok(f(&child))
    }

    /// Takes a lease using a borrowed span of values. See
    /// [`Self::acquire_lease_slice`].
    pub fn with_lease_slice<F, R>(&self, values: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(&Child) -> R,
    {
        self.with_lease(&LabelValues::from_slice(values), f)
    }

    fn release(&self, values: &LabelValues) {
        let now = self.shared.clock.now();
        let Some(info) = self.shared.lifetimes.read().get(values).cloned() else { return };

        info.lease_count.fetch_sub(1, Ordering::AcqRel);
        *info.keepalive.lock() = now;

        if info.ended.load(Ordering::Acquire) {
            // The reaper already retired this key between acquire and
            // release. Re-register a fresh lifetime so the key survives.
            if let Ok((_, release)) = self.acquire_lease(values) {
                drop(release);
            }
        }
    }

    /// Number of live (un-reaped) keys, for tests and diagnostics.
    pub fn live_count(&self) -> usize {
        self.shared.lifetimes.read().len()
    }

    /// The current time on this handle's clock, for driving [`Self::sweep_once`]
    /// from outside the background reaper (e.g. in tests against a mocked
    /// clock).
    pub fn now(&self) -> Instant {
        self.shared.clock.now()
    }

    #[cfg(feature = "async-runtime")]
    fn ensure_reaper_running(&self) {
        if self.shared.reaper_running.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = self.clone();
        tokio::spawn(async move {
            handle.run_reaper().await;
        });
    }

    #[cfg(feature = "async-runtime")]
    async fn run_reaper(&self) {
        loop {
            tokio::time::sleep(self.shared.expires_after).await;
            if self.sweep_once(self.shared.clock.now()) {
                break;
            }
        }
    }

    /// Runs one reaper sweep at `now`: any key with no outstanding lease
    /// that has been idle for at least `expires_after` is retired, and its
    /// backing child is removed from the collector via
    /// [`Collector::remove_labelled`]. Returns whether no lifetimes remain
    /// afterward (the point at which a running reaper would exit).
    ///
    /// Exposed directly (rather than only reachable through the spawned
    /// async loop) so the expiration behavior can be exercised
    /// deterministically against a mocked clock.
    pub fn sweep_once(&self, now: Instant) -> bool {
        let expires_after = self.shared.expires_after;

        let candidates: Vec<LabelValues> = self
            .shared
            .lifetimes
            .read()
            .iter()
            .filter(|(_, info)| info.is_expired(now, expires_after))
            .map(|(values, _)| values.clone())
            .collect();

        for values in candidates {
            let mut lifetimes = self.shared.lifetimes.write();
            let Some(info) = lifetimes.get(&values).cloned() else { continue };
            if !info.is_expired(now, expires_after) {
                continue;
            }

            info.ended.store(true, Ordering::Release);
            lifetimes.remove(&values);
            drop(lifetimes);
            self.shared.collector.remove_labelled(&values);
        }

        let empty = self.shared.lifetimes.read().is_empty();
        if empty {
            self.shared.reaper_running.store(false, Ordering::Release);
        }
        empty
    }
}

/// Extracts the typed child a managed view operates on, panicking if the
/// collector's pinned metric type has somehow been violated. Implemented for
/// the concrete child types a [`LifetimeHandle`] can be built over.
pub trait FromChild {
    /// Unwraps `child` into the type this view expects.
    fn from_child(child: &Child) -> &Self;
}

impl FromChild for Counter {
    fn from_child(child: &Child) -> &Self {
        expect_counter(child)
    }
}

impl FromChild for Gauge {
    fn from_child(child: &Child) -> &Self {
        expect_gauge(child)
    }
}

/// The metric-writing surface a lifetime view delegates to. Implemented by
/// the concrete child types so [`AutoLeaseView`] can wrap any of them
/// uniformly.
pub trait LeasedWrite {
    /// The single write operation this metric kind supports through a
    /// lifetime view (`inc_to` for a counter, `set` for a gauge).
    fn write(&self, amount: f64);
}

impl LeasedWrite for Counter {
    fn write(&self, amount: f64) {
        self.inc_to(amount);
    }
}

impl LeasedWrite for Gauge {
    fn write(&self, amount: f64) {
        self.set(amount);
    }
}

/// A view over a [`LifetimeHandle`] that takes and immediately releases a
/// lease around every write; reads are not supported.
pub struct AutoLeaseView<T: LeasedWrite + FromChild + Send + Sync + 'static> {
    handle: LifetimeHandle,
    _child: PhantomData<fn() -> T>,
}

impl<T: LeasedWrite + FromChild + Send + Sync + 'static> AutoLeaseView<T> {
    /// Wraps `handle` in an auto-leasing view.
    pub fn new(handle: LifetimeHandle) -> Self {
        Self { handle, _child: PhantomData }
    }

    /// Writes `amount` to the child for `values`, extending its lifetime for
    /// the duration of the call.
    pub fn write(&self, values: &LabelValues, amount: f64) -> Result<()> {
        self.handle.with_lease(values, |child| T::from_child(child).write(amount))
    }

    /// Writes `amount` to the child for a borrowed span of values. See
    /// [`LifetimeHandle::acquire_lease_slice`].
    pub fn write_slice(&self, values: &[&str], amount: f64) -> Result<()> {
        self.write(&LabelValues::from_slice(values), amount)
    }

    /// Reads are not supported through an auto-leasing view.
    pub fn read(&self, _values: &LabelValues) -> Result<f64> {
        Err(MetricsError::OperationUnsupported("reads are not supported through an auto-leasing view"))
    }
}

/// A view that prepends a fixed static key prefix to every label-values
/// argument before delegating to the inner handle.
pub struct LabelEnrichingView {
    handle: LifetimeHandle,
    prefix: LabelValues,
}

impl LabelEnrichingView {
    /// Wraps `handle`, prepending `prefix` to every label-values argument.
    pub fn new(handle: LifetimeHandle, prefix: LabelValues) -> Self {
        Self { handle, prefix }
    }

    fn enrich(&self, values: &LabelValues) -> LabelValues {
        self.prefix.concat(values)
    }

    /// Takes a lease on the enriched key, equivalent to leasing the inner
    /// handle directly with the full enriched key.
    pub fn acquire_lease(&self, values: &LabelValues) -> Result<(Arc<Child>, Lease)> {
        self.handle.acquire_lease(&self.enrich(values))
    }

    /// Takes a lease on the enriched key built from a borrowed span of
    /// values. See [`LifetimeHandle::acquire_lease_slice`].
    pub fn acquire_lease_slice(&self, values: &[&str]) -> Result<(Arc<Child>, Lease)> {
        self.acquire_lease(&LabelValues::from_slice(values))
    }

    /// Takes a lease on the enriched key, runs `f`, and releases it.
    pub fn with_lease<F, R>(&self, values: &LabelValues, f: F) -> Result<R>
    where
        F: FnOnce(&Child) -> R,
    {
        self.handle.with_lease(&self.enrich(values), f)
    }

    /// Takes a lease on the enriched key built from a borrowed span of
    /// values, runs `f`, and releases it.
    pub fn with_lease_slice<F, R>(&self, values: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(&Child) -> R,
    {
        self.with_lease(&LabelValues::from_slice(values), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::Counter as CounterChild;
    use crate::family::CollectorIdentity;
    use crate::label::LabelNames;

    fn test_collector() -> Arc<Collector> {
        test_collector_with_names(["route"])
    }

    fn test_collector_with_names<const N: usize>(names: [&str; N]) -> Arc<Collector> {
        let identity = CollectorIdentity::new(
            LabelNames::new(names).unwrap(),
            LabelNames::empty(),
            LabelValues::empty(),
        )
        .unwrap();
        Arc::new(Collector::new(identity))
    }

    fn counter_handle(expires_after: Duration, clock: Clock) -> LifetimeHandle {
        let collector = test_collector();
        LifetimeHandle::new(expires_after, clock, collector, || {
            Ok(Child::Counter(CounterChild::new(false, None)))
        })
    }

    fn counter_handle_over(collector: Arc<Collector>, expires_after: Duration, clock: Clock) -> LifetimeHandle {
        LifetimeHandle::new(expires_after, clock, collector, || {
            Ok(Child::Counter(CounterChild::new(false, None)))
        })
    }

    #[test]
    fn acquire_lease_creates_and_reuses_child() {
        let (clock, _mock) = Clock::mock();
        let handle = counter_handle(Duration::from_secs(60), clock);
        let values = LabelValues::new(["a"]);

        let (child_a, lease_a) = handle.acquire_lease(&values).unwrap();
        expect_counter(&child_a).inc_to(1.0);
        drop(lease_a);

        let (child_b, _lease_b) = handle.acquire_lease(&values).unwrap();
        assert_eq!(expect_counter(&child_b).value(), 1.0);
        assert_eq!(handle.live_count(), 1);
    }

    #[test]
    fn acquire_lease_slice_matches_owned_key() {
        let (clock, _mock) = Clock::mock();
        let handle = counter_handle(Duration::from_secs(60), clock);

        let (child_a, _lease_a) = handle.acquire_lease_slice(&["a"]).unwrap();
        expect_counter(&child_a).inc_to(7.0);

        let (child_b, _lease_b) = handle.acquire_lease(&LabelValues::new(["a"])).unwrap();
        assert_eq!(expect_counter(&child_b).value(), 7.0);
    }

    #[test]
    fn acquire_lease_rejects_arity_mismatch() {
        let (clock, _mock) = Clock::mock();
        let handle = counter_handle(Duration::from_secs(60), clock);

        let err = handle.acquire_lease(&LabelValues::new(["a", "extra"])).unwrap_err();
        assert!(matches!(err, MetricsError::ArityMismatch { .. }));
    }

    #[test]
    fn with_lease_releases_after_use() {
        let (clock, _mock) = Clock::mock();
        let handle = counter_handle(Duration::from_secs(60), clock);
        let values = LabelValues::new(["a"]);

        let total = handle
            .with_lease(&values, |child| {
                expect_counter(child).inc_to(5.0);
                expect_counter(child).value()
            })
            .unwrap();
        assert_eq!(total, 5.0);
    }

    #[test]
    fn auto_lease_view_rejects_reads() {
        let (clock, _mock) = Clock::mock();
        let handle = counter_handle(Duration::from_secs(60), clock);
        let view = AutoLeaseView::<CounterChild>::new(handle);

        view.write(&LabelValues::new(["a"]), 3.0).unwrap();
        assert!(view.read(&LabelValues::new(["a"])).is_err());
    }

    #[test]
    fn auto_lease_view_write_slice_matches_owned_key() {
        let (clock, _mock) = Clock::mock();
        let handle = counter_handle(Duration::from_secs(60), clock);
        let view = AutoLeaseView::<CounterChild>::new(handle.clone());

        view.write_slice(&["a"], 4.0).unwrap();

        let (child, _lease) = handle.acquire_lease(&LabelValues::new(["a"])).unwrap();
        assert_eq!(expect_counter(&child).value(), 4.0);
    }

    #[test]
    fn sweep_once_reaps_idle_keys_and_removes_them_from_the_collector() {
        let (clock, mock) = Clock::mock();
        let collector = test_collector();
        let handle = LifetimeHandle::new(Duration::from_secs(60), clock, Arc::clone(&collector), || {
            Ok(Child::Counter(CounterChild::new(false, None)))
        });

        let idle = LabelValues::new(["idle"]);
        let held = LabelValues::new(["held"]);

        let (_, idle_lease) = handle.acquire_lease(&idle).unwrap();
        drop(idle_lease);
        let (_, held_lease) = handle.acquire_lease(&held).unwrap();

        assert_eq!(handle.live_count(), 2);

        mock.increment(Duration::from_secs(61));
        handle.sweep_once(handle.now());

        assert_eq!(handle.live_count(), 1);
        assert!(collector.get_child(&held).is_some());
        assert!(collector.get_child(&idle).is_none());

        drop(held_lease);
    }

    #[test]
    fn label_enriching_view_prepends_prefix() {
        let (clock, _mock) = Clock::mock();
        let collector = test_collector_with_names(["tenant", "route"]);
        let handle = counter_handle_over(collector, Duration::from_secs(60), clock);
        let prefixed = LabelEnrichingView::new(handle.clone(), LabelValues::new(["tenant-1"]));

        prefixed
            .with_lease(&LabelValues::new(["route"]), |child| expect_counter(child).inc_to(1.0))
            .unwrap();

        let (child, _lease) = handle.acquire_lease(&LabelValues::new(["tenant-1", "route"])).unwrap();
        assert_eq!(expect_counter(&child).value(), 1.0);
    }

    #[test]
    fn label_enriching_view_slice_matches_owned_key() {
        let (clock, _mock) = Clock::mock();
        let collector = test_collector_with_names(["tenant", "route"]);
        let handle = counter_handle_over(collector, Duration::from_secs(60), clock);
        let prefixed = LabelEnrichingView::new(handle.clone(), LabelValues::new(["tenant-1"]));

        prefixed.with_lease_slice(&["route"], |child| expect_counter(child).inc_to(2.0)).unwrap();

        let (child, _lease) = handle.acquire_lease(&LabelValues::new(["tenant-1", "route"])).unwrap();
        assert_eq!(expect_counter(&child).value(), 2.0);
    }
}
