use thiserror::Error;

/// Errors surfaced by the registry, its children, and the text serializer.
///
/// Construction-time errors (building a family, a collector, or a label set)
/// are fatal to the caller and should generally not be retried with the same
/// arguments. Recording-path errors are limited to the handful of cases
/// spec.md calls out as fallible (a negative counter increment, an oversized
/// exemplar); every other recording path is infallible by construction.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric or label name failed the `^[a-zA-Z_][a-zA-Z0-9_]*$` pattern.
    #[error("invalid metric or label name: {0:?}")]
    InvalidName(String),

    /// A label name started with the reserved `__` prefix.
    #[error("label name {0:?} starts with the reserved `__` prefix")]
    ReservedLabelName(String),

    /// A reserved label (`le` for histograms, `quantile` for summaries) was
    /// supplied where the metric type forbids it.
    #[error("label {0:?} is reserved for {1} metrics")]
    ReservedLabelUse(String, &'static str),

    /// The number of label values did not match the number of declared label
    /// names.
    #[error("expected {expected} label value(s), got {actual}")]
    ArityMismatch {
        /// Number of label names declared on the collector.
        expected: usize,
        /// Number of label values the caller supplied.
        actual: usize,
    },

    /// A family already exists under this name with a different metric type.
    #[error("metric {name:?} already registered as {existing}, cannot re-register as {requested}")]
    TypeMismatch {
        /// Name of the already-registered family.
        name: String,
        /// The metric type the family was created with.
        existing: &'static str,
        /// The metric type requested by this call.
        requested: &'static str,
    },

    /// Instance and static label sets for a collector share a label name.
    #[error("label {0:?} is present in both instance and static labels")]
    LabelCollision(String),

    /// An attempt was made to decrease a counter's value.
    #[error("counter cannot be decremented (attempted delta {0})")]
    MonotonicityViolation(f64),

    /// An exemplar was rejected: duplicate keys, or over the rune budget.
    #[error("invalid exemplar: {0}")]
    ExemplarInvalid(&'static str),

    /// A construction-time configuration value was out of range.
    #[error("illegal configuration: {0}")]
    IllegalConfiguration(&'static str),

    /// A before-collect callback raised a distinguished scrape-failure; the
    /// collect that triggered it is aborted and this error propagates to the
    /// caller of [`crate::registry::Registry::collect_and_export`].
    #[error("scrape failed: {0}")]
    ScrapeFailed(String),

    /// The operation is not supported in this mode (e.g. reading through an
    /// auto-leasing managed-lifetime view).
    #[error("operation not supported: {0}")]
    OperationUnsupported(&'static str),

    /// Serializing to the underlying writer failed.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MetricsError>;
