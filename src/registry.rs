//! The registry: name-keyed families, registry-wide static labels, and the
//! before-collect callback pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use quanta::Clock;

use crate::children::{SummaryConfig, DEFAULT_HISTOGRAM_BOUNDS};
use crate::error::{MetricsError, Result};
use crate::exemplar::{exemplar_pool, ExemplarPool};
use crate::family::{CollectPools, Family, MetricType};
use crate::format::{write_registry, Format};
use crate::label::{LabelNames, LabelValues};
use crate::naming::validate_name;
use crate::pool::PooledVec;

#[cfg(feature = "tracing")]
use tracing::warn;

/// Construction-time configuration for a [`Registry`].
#[derive(Clone)]
pub struct RegistryConfig {
    /// Bucket bounds used by collectors that don't override them.
    pub default_histogram_bounds: Arc<[f64]>,
    /// Summary buffering/rotation defaults used by collectors that don't
    /// override them.
    pub default_summary_config: SummaryConfig,
    /// Whether new children start unpublished until their first write.
    pub suppress_initial_value: bool,
    /// Minimum interval between recorded exemplars; `None` disables
    /// rate-limiting.
    pub exemplar_min_interval: Option<Duration>,
    /// Maximum number of pooled exemplar allocations kept per registry.
    pub exemplar_pool_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_histogram_bounds: Arc::from(DEFAULT_HISTOGRAM_BOUNDS),
            default_summary_config: SummaryConfig::default(),
            suppress_initial_value: false,
            exemplar_min_interval: None,
            exemplar_pool_capacity: 64,
        }
    }
}

type SyncCallback = Box<dyn Fn() -> Result<()> + Send + Sync>;

#[cfg(feature = "async-runtime")]
type AsyncCallback = Arc<
    dyn Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// A concurrent registry of metric families.
pub struct Registry {
    families: RwLock<IndexMap<Arc<str>, Arc<Family>>>,
    static_labels: RwLock<Option<(LabelNames, LabelValues)>>,
    first_collect_done: AtomicBool,
    first_collect_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    sync_callbacks: RwLock<Vec<SyncCallback>>,
    #[cfg(feature = "async-runtime")]
    async_callbacks: RwLock<Vec<AsyncCallback>>,
    pools: CollectPools,
    config: RegistryConfig,
    clock: Clock,
}

impl Registry {
    /// Creates a new, empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Creates a new, empty registry driven by an explicit clock. Primarily
    /// for tests that need deterministic control over managed-lifetime
    /// expiry via a mocked `quanta::Clock`; production code should use
    /// [`Registry::new`].
    pub fn with_clock(config: RegistryConfig, clock: Clock) -> Self {
        Self {
            families: RwLock::new(IndexMap::new()),
            static_labels: RwLock::new(None),
            first_collect_done: AtomicBool::new(false),
            first_collect_hook: Mutex::new(None),
            sync_callbacks: RwLock::new(Vec::new()),
            #[cfg(feature = "async-runtime")]
            async_callbacks: RwLock::new(Vec::new()),
            pools: CollectPools::new(exemplar_pool(config.exemplar_pool_capacity)),
            config,
            clock,
        }
    }

    /// The registry's construction-time configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The registry's monotonic clock, shared by every collector it owns.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The exemplar pool shared by every collector this registry owns.
    pub fn exemplar_pool(&self) -> &ExemplarPool {
        &self.pools.exemplar
    }

    /// The full pool set backing this registry's collection passes, for
    /// callers (the managed-lifetime factory) that need to construct
    /// collectors directly.
    pub(crate) fn pools(&self) -> &CollectPools {
        &self.pools
    }

    /// Sets the registry-wide static label set. Fails if any family already
    /// exists, if static labels were already set, or if a collect has
    /// already happened.
    pub fn set_static_labels<I, S>(&self, names: I, values: LabelValues) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.families.read().is_empty() {
            return Err(MetricsError::IllegalConfiguration(
                "static labels must be set before any family is created",
            ));
        }
        if self.first_collect_done.load(Ordering::Acquire) {
            return Err(MetricsError::IllegalConfiguration(
                "static labels cannot be set after the first collect",
            ));
        }

        let mut guard = self.static_labels.write();
        if guard.is_some() {
            return Err(MetricsError::IllegalConfiguration("static labels may only be set once"));
        }

        let names = LabelNames::new(names)?;
        if names.len() != values.len() {
            return Err(MetricsError::ArityMismatch { expected: names.len(), actual: values.len() });
        }

        *guard = Some((names, values));
        Ok(())
    }

    /// The registry-wide static label set, if one was configured.
    pub fn static_labels(&self) -> Option<(LabelNames, LabelValues)> {
        self.static_labels.read().clone()
    }

    /// Registers the once-only hook run before the very first collect (used
    /// to install default metrics).
    pub fn set_first_collect_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.first_collect_hook.lock() = Some(Box::new(hook));
    }

    /// Appends a synchronous before-collect callback.
    pub fn add_before_collect_callback<F>(&self, callback: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.sync_callbacks.write().push(Box::new(callback));
    }

    /// Appends an asynchronous before-collect callback.
    #[cfg(feature = "async-runtime")]
    pub fn add_async_before_collect_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.async_callbacks.write().push(Arc::new(move || Box::pin(callback())));
    }

    /// Returns the family named `name`, creating it with `help` and
    /// `metric_type` on first request. Fails if an existing family under
    /// this name has a different metric type.
    pub fn get_or_add_family(
        &self,
        name: &str,
        metric_type: MetricType,
        help: &str,
    ) -> Result<Arc<Family>> {
        validate_name(name)?;

        if let Some(family) = self.families.read().get(name) {
            return Self::check_type(family, metric_type);
        }

        let mut families = self.families.write();
        if let Some(family) = families.get(name) {
            return Self::check_type(family, metric_type);
        }

        let family = Arc::new(Family::new(Arc::from(name), Arc::from(help), metric_type));
        families.insert(Arc::from(name), Arc::clone(&family));
        Ok(family)
    }

    fn check_type(family: &Arc<Family>, requested: MetricType) -> Result<Arc<Family>> {
        if family.metric_type() != requested {
            return Err(MetricsError::TypeMismatch {
                name: family.name().to_owned(),
                existing: family.metric_type().wire_name(),
                requested: requested.wire_name(),
            });
        }
        Ok(Arc::clone(family))
    }

    fn run_callback(result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err @ MetricsError::ScrapeFailed(_)) => Err(err),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                warn!(error = %_err, "before-collect callback failed; swallowing");
                Ok(())
            }
        }
    }

    fn run_first_collect_and_sync_callbacks(&self) -> Result<()> {
        if !self.first_collect_done.swap(true, Ordering::AcqRel) {
            if let Some(hook) = self.first_collect_hook.lock().take() {
                hook();
            }
        }

        for callback in self.sync_callbacks.read().iter() {
            Self::run_callback(callback())?;
        }

        Ok(())
    }

    /// Runs before-collect callbacks, snapshots every family and its
    /// children, and serializes the result in `format` to `writer`.
    pub fn collect_and_export(
        &self,
        writer: &mut impl std::io::Write,
        format: Format,
    ) -> Result<()> {
        self.run_first_collect_and_sync_callbacks()?;
        let mut families = PooledVec::new(&self.pools.families);
        families.extend(self.families.read().values().cloned());
        write_registry(&families, writer, format, &self.pools)
    }

    /// Same as [`Registry::collect_and_export`], but also awaits every
    /// asynchronous before-collect callback concurrently before
    /// serializing.
    #[cfg(feature = "async-runtime")]
    pub async fn collect_and_export_async(
        &self,
        writer: &mut impl std::io::Write,
        format: Format,
    ) -> Result<()> {
        self.run_first_collect_and_sync_callbacks()?;

        let callbacks = self.async_callbacks.read().clone();
        let results = futures_util::future::join_all(callbacks.iter().map(|cb| cb())).await;
        for result in results {
            Self::run_callback(result)?;
        }

        let mut families = PooledVec::new(&self.pools.families);
        families.extend(self.families.read().values().cloned());
        write_registry(&families, writer, format, &self.pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_add_family_rejects_type_mismatch() {
        let registry = Registry::new(RegistryConfig::default());
        registry.get_or_add_family("requests", MetricType::Counter, "").unwrap();

        let err = registry.get_or_add_family("requests", MetricType::Gauge, "").unwrap_err();
        assert!(matches!(err, MetricsError::TypeMismatch { .. }));
    }

    #[test]
    fn static_labels_cannot_be_set_twice() {
        let registry = Registry::new(RegistryConfig::default());
        registry.set_static_labels(["region"], LabelValues::new(["us-east"])).unwrap();

        let err =
            registry.set_static_labels(["region"], LabelValues::new(["us-west"])).unwrap_err();
        assert!(matches!(err, MetricsError::IllegalConfiguration(_)));
    }

    #[test]
    fn static_labels_rejected_after_family_exists() {
        let registry = Registry::new(RegistryConfig::default());
        registry.get_or_add_family("requests", MetricType::Counter, "").unwrap();

        let err = registry.set_static_labels(["region"], LabelValues::new(["us-east"])).unwrap_err();
        assert!(matches!(err, MetricsError::IllegalConfiguration(_)));
    }

    #[test]
    fn scrape_failed_callback_aborts_collection() {
        let registry = Registry::new(RegistryConfig::default());
        registry.add_before_collect_callback(|| Err(MetricsError::ScrapeFailed("boom".into())));

        let mut buf = Vec::new();
        let err = registry.collect_and_export(&mut buf, Format::Prometheus).unwrap_err();
        assert!(matches!(err, MetricsError::ScrapeFailed(_)));
    }

    #[test]
    fn other_callback_errors_are_swallowed() {
        let registry = Registry::new(RegistryConfig::default());
        registry
            .add_before_collect_callback(|| Err(MetricsError::IllegalConfiguration("unrelated")));

        let mut buf = Vec::new();
        registry.collect_and_export(&mut buf, Format::Prometheus).unwrap();
    }
}
