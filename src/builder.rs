//! `RegistryBuilder`: an in-process, consuming builder for [`RegistryConfig`],
//! mirroring `metrics-exporter-prometheus`'s `PrometheusBuilder`. No file or
//! environment-variable configuration is in scope here; this is purely a
//! construction convenience over [`Registry::new`].

use std::sync::Arc;
use std::time::Duration;

use crate::children::{SummaryConfig, DEFAULT_HISTOGRAM_BOUNDS};
use crate::quantile::Target;
use crate::registry::{Registry, RegistryConfig};

/// Builds a [`Registry`] with non-default construction-time configuration.
pub struct RegistryBuilder {
    config: RegistryConfig,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Creates a builder seeded with [`RegistryConfig::default`].
    pub fn new() -> Self {
        Self { config: RegistryConfig::default() }
    }

    /// Sets the default histogram bucket bounds used by histograms created
    /// without explicit bounds. Defaults to [`DEFAULT_HISTOGRAM_BOUNDS`].
    pub fn default_histogram_bounds(mut self, bounds: &[f64]) -> Self {
        self.config.default_histogram_bounds = Arc::from(bounds);
        self
    }

    /// Sets the `(quantile, epsilon)` targets summaries are created with by
    /// default.
    pub fn default_summary_targets(mut self, targets: &[Target]) -> Self {
        self.config.default_summary_config.targets = Arc::from(targets);
        self
    }

    /// Sets the sliding-window span summaries rotate their quantile streams
    /// over by default. Defaults to 10 minutes.
    pub fn default_summary_max_age(mut self, max_age: Duration) -> Self {
        self.config.default_summary_config.max_age = max_age;
        self
    }

    /// Sets the number of rotating age buckets summaries use by default.
    /// Defaults to 5.
    pub fn default_summary_age_buckets(mut self, age_buckets: usize) -> Self {
        self.config.default_summary_config.age_buckets = age_buckets;
        self
    }

    /// Sets the sample-buffer capacity summaries use by default before
    /// flushing into their quantile streams. Defaults to 500.
    pub fn default_summary_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.config.default_summary_config.buffer_capacity = buffer_capacity;
        self
    }

    /// Applies a complete [`SummaryConfig`] in one call, overriding any of
    /// the individual `default_summary_*` setters called before it.
    pub fn default_summary_config(mut self, config: SummaryConfig) -> Self {
        self.config.default_summary_config = config;
        self
    }

    /// When set, newly created children start unpublished and are omitted
    /// from exposition until their first write. Defaults to `false`.
    pub fn suppress_initial_value(mut self, suppress: bool) -> Self {
        self.config.suppress_initial_value = suppress;
        self
    }

    /// Sets the minimum interval between recorded exemplars on any single
    /// counter or histogram bucket. `None` disables rate-limiting.
    pub fn exemplar_min_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.exemplar_min_interval = interval;
        self
    }

    /// Sets the maximum number of pooled exemplar allocations the registry
    /// keeps on hand. Defaults to 64.
    pub fn exemplar_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.exemplar_pool_capacity = capacity;
        self
    }

    /// Consumes the builder, producing a new, empty [`Registry`].
    pub fn build(self) -> Registry {
        Registry::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_registry_config_default() {
        let registry = RegistryBuilder::new().build();
        let default_config = RegistryConfig::default();
        assert_eq!(registry.config().default_histogram_bounds, default_config.default_histogram_bounds);
        assert_eq!(registry.config().suppress_initial_value, default_config.suppress_initial_value);
    }

    #[test]
    fn overrides_take_effect() {
        let registry = RegistryBuilder::new()
            .suppress_initial_value(true)
            .default_histogram_bounds(&[1.0, 2.0])
            .exemplar_min_interval(Some(Duration::from_secs(5)))
            .build();

        assert!(registry.config().suppress_initial_value);
        assert_eq!(&*registry.config().default_histogram_bounds, &[1.0, 2.0]);
        assert_eq!(registry.config().exemplar_min_interval, Some(Duration::from_secs(5)));
    }

    #[test]
    fn unset_default_bounds_fall_back_to_the_constant() {
        let registry = RegistryBuilder::new().build();
        assert_eq!(&*registry.config().default_histogram_bounds, DEFAULT_HISTOGRAM_BOUNDS);
    }
}
