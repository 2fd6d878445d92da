//! A concurrent metric registry with byte-exact Prometheus and OpenMetrics
//! text exposition.
//!
//! ## Basics
//!
//! This crate is the recording and serialization core of a metrics library:
//! families of named metrics, collectors keyed by a static label set, and
//! children keyed by per-call label values. It does not ship an HTTP
//! listener, a push-gateway client, or process-metrics collectors — callers
//! compose those on top of [`Registry`](registry::Registry) and
//! [`Format`](format::Format).
//!
//! ## High-level features
//!
//! - counters, gauges, histograms, and Cormode-Korn-Muthukrishnan
//!   biased-quantile summaries, each with lock-free hot-path updates
//! - exemplar annotations on counters and histogram buckets, pooled and
//!   rate-limited
//! - managed-lifetime metrics with lease-counted reference tracking and a
//!   background reaper
//! - Prometheus text format and OpenMetrics text format serialization from
//!   the same in-memory state
//!
//! ## Behavior
//!
//! Metric and label names are validated against `^[a-zA-Z_][a-zA-Z0-9_]*$`
//! at construction time and rejected outright rather than sanitized, so a
//! caller never has an invalid name silently rewritten underneath it.

#![warn(missing_docs)]

pub mod atomics;
pub mod builder;
pub mod children;
pub mod error;
pub mod exemplar;
pub mod factory;
pub mod family;
pub mod format;
pub mod label;
pub mod lifetime;
pub mod naming;
pub mod pool;
pub mod quantile;
pub mod registry;

pub use builder::RegistryBuilder;
pub use error::{MetricsError, Result};
pub use factory::MetricFactory;
pub use format::Format;
pub use registry::{Registry, RegistryConfig};
