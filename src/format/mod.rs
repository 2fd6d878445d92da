//! Byte-exact Prometheus and OpenMetrics text exposition.
//!
//! Shared line-writing helpers live here; the two format-specific files
//! supply only what differs between them (counter naming, the decimal-point
//! rule, exemplar rendering, the end-of-stream marker).

pub mod openmetrics;
pub mod prometheus;

use std::io::Write;
use std::sync::Arc;

use quanta::Instant;

use crate::error::Result;
use crate::exemplar::Exemplar;
use crate::family::{Child, Collector, CollectPools, Family};
use crate::label::{LabelNames, LabelValues};
use crate::pool::PooledString;

/// Which text exposition variant to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// `text/plain; version=0.0.4`.
    Prometheus,
    /// `application/openmetrics-text; version=1.0.0`.
    OpenMetrics,
}

/// Per-format rendering policy, implemented by [`prometheus`] and
/// [`openmetrics`].
pub(crate) trait Dialect {
    /// Computes the `(header name, point name, TYPE word)` triple for a
    /// counter family, which differs between formats due to the `_total`
    /// suffix convention.
    fn counter_names(name: &str) -> (String, String, &'static str);

    /// Whether numeric output must contain a decimal point even for
    /// integer-looking values.
    fn force_decimal_point() -> bool;

    /// Whether exemplars are rendered at all.
    fn supports_exemplars() -> bool;

    /// Writes the end-of-stream marker, if the format has one.
    fn write_terminator(writer: &mut impl Write) -> Result<()>;
}

/// Formats `value` using the shortest round-trip representation, applying
/// the special sentinels for non-finite values and the format's
/// decimal-point policy for integer-looking finite values.
pub(crate) fn format_number(value: f64, force_decimal_point: bool) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value == f64::INFINITY {
        return "+Inf".to_string();
    }
    if value == f64::NEG_INFINITY {
        return "-Inf".to_string();
    }

    let mut buf = ryu::Buffer::new();
    let formatted = buf.format_finite(value);
    if force_decimal_point && !formatted.contains('.') && !formatted.contains('e') {
        format!("{formatted}.0")
    } else {
        formatted.to_string()
    }
}

fn format_u64(value: u64) -> String {
    let mut buf = itoa::Buffer::new();
    buf.format(value).to_string()
}

/// Escapes `value` directly into `line`: `\` to `\\`, newline to `\n`, `"`
/// to `\"`. Writes in place rather than building an intermediate `String` so
/// no per-label-value allocation is needed on the hot serialization path.
pub(crate) fn write_escaped_label_value(line: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => line.push_str("\\\\"),
            '\n' => line.push_str("\\n"),
            '"' => line.push_str("\\\""),
            other => line.push(other),
        }
    }
}

fn write_label_set(
    line: &mut String,
    names: &LabelNames,
    values: &LabelValues,
    extra: Option<(&str, &str)>,
) {
    let has_labels = !names.is_empty() || extra.is_some();
    if !has_labels {
        return;
    }

    line.push('{');
    let mut first = true;
    for (name, value) in names.iter().zip(values.iter()) {
        if !first {
            line.push(',');
        }
        first = false;
        line.push_str(name);
        line.push_str("=\"");
        write_escaped_label_value(line, value);
        line.push('"');
    }
    if let Some((name, value)) = extra {
        if !first {
            line.push(',');
        }
        line.push_str(name);
        line.push_str("=\"");
        line.push_str(value);
        line.push('"');
    }
    line.push('}');
}

struct PointLine<'a> {
    name: &'a str,
    suffix: Option<&'a str>,
    names: &'a LabelNames,
    values: &'a LabelValues,
    extra_label: Option<(&'a str, &'a str)>,
    value: f64,
}

fn write_point<D: Dialect>(
    writer: &mut impl Write,
    point: PointLine<'_>,
    exemplar: Option<&Exemplar>,
    pools: &CollectPools,
) -> Result<()> {
    let mut line = PooledString::new(&pools.lines);
    line.push_str(point.name);
    if let Some(suffix) = point.suffix {
        line.push('_');
        line.push_str(suffix);
    }

    write_label_set(&mut line, point.names, point.values, point.extra_label);

    line.push(' ');
    line.push_str(&format_number(point.value, D::force_decimal_point()));

    if D::supports_exemplars() {
        if let Some(exemplar) = exemplar {
            write_exemplar(&mut line, exemplar);
        }
    }

    line.push('\n');
    writer.write_all(line.as_bytes())?;
    Ok(())
}

fn write_exemplar(line: &mut String, exemplar: &Exemplar) {
    line.push_str(" # {");
    for (i, (key, value)) in exemplar.labels().iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(key);
        line.push_str("=\"");
        write_escaped_label_value(line, value);
        line.push('"');
    }
    line.push_str("} ");
    line.push_str(&format_number(exemplar.value(), true));
    line.push(' ');
    line.push_str(&format_number(exemplar.timestamp_unix_secs(), true));
}

fn write_registry_generic<D: Dialect>(
    families: &[Arc<Family>],
    writer: &mut impl Write,
    pools: &CollectPools,
) -> Result<()> {
    for family in families {
        write_family::<D>(family, writer, pools)?;
    }
    D::write_terminator(writer)?;
    writer.flush()?;
    Ok(())
}

fn write_family<D: Dialect>(
    family: &Family,
    writer: &mut impl Write,
    pools: &CollectPools,
) -> Result<()> {
    use crate::family::MetricType;

    let (header_name, point_name, type_word) = match family.metric_type() {
        MetricType::Counter => D::counter_names(family.name()),
        other => (family.name().to_string(), family.name().to_string(), other.wire_name()),
    };

    writeln!(writer, "# HELP {header_name} {}", family.help())?;
    writeln!(writer, "# TYPE {header_name} {type_word}")?;

    let collectors = family.snapshot_collectors(&pools.collectors);
    for collector in collectors.iter() {
        write_collector::<D>(collector, &point_name, family.metric_type(), writer, pools)?;
    }

    Ok(())
}

fn write_collector<D: Dialect>(
    collector: &Collector,
    point_name: &str,
    metric_type: crate::family::MetricType,
    writer: &mut impl Write,
    pools: &CollectPools,
) -> Result<()> {
    use crate::family::MetricType;

    let identity = collector.identity();
    let names = identity.instance_names().concat(identity.static_names())?;

    let children = collector.snapshot_children(&pools.children);
    for (instance_values, child) in children.iter() {
        if !child.published() {
            continue;
        }

        let values = instance_values.concat(identity.static_values());

        match (&**child, metric_type) {
            (Child::Counter(counter), MetricType::Counter) => {
                let exemplar = if D::supports_exemplars() { counter.borrow_exemplar() } else { None };
                write_point::<D>(
                    writer,
                    PointLine {
                        name: point_name,
                        suffix: None,
                        names: &names,
                        values: &values,
                        extra_label: None,
                        value: counter.value(),
                    },
                    exemplar.as_deref(),
                    pools,
                )?;
                if let Some(exemplar) = exemplar {
                    counter.give_back_exemplar(exemplar, &pools.exemplar);
                }
            }
            (Child::Gauge(gauge), MetricType::Gauge) => {
                write_point::<D>(
                    writer,
                    PointLine {
                        name: point_name,
                        suffix: None,
                        names: &names,
                        values: &values,
                        extra_label: None,
                        value: gauge.value(),
                    },
                    None,
                    pools,
                )?;
            }
            (Child::Histogram(histogram), MetricType::Histogram) => {
                write_point::<D>(
                    writer,
                    PointLine {
                        name: point_name,
                        suffix: Some("sum"),
                        names: &names,
                        values: &values,
                        extra_label: None,
                        value: histogram.sum(),
                    },
                    None,
                    pools,
                )?;
                write_count_line(writer, point_name, &names, &values, histogram.count(), &pools.lines)?;

                let bounds = histogram.bounds();
                let cumulative = histogram.cumulative_counts();
                for (idx, (&bound, &count)) in bounds.iter().zip(cumulative.iter()).enumerate() {
                    let bound_str = format_number(bound, D::force_decimal_point());
                    let exemplar =
                        if D::supports_exemplars() { histogram.borrow_exemplar(idx) } else { None };
                    write_point::<D>(
                        writer,
                        PointLine {
                            name: point_name,
                            suffix: Some("bucket"),
                            names: &names,
                            values: &values,
                            extra_label: Some(("le", &bound_str)),
                            value: count as f64,
                        },
                        exemplar.as_deref(),
                        pools,
                    )?;
                    if let Some(exemplar) = exemplar {
                        histogram.give_back_exemplar(idx, exemplar, &pools.exemplar);
                    }
                }
            }
            (Child::Summary(summary), MetricType::Summary) => {
                let snapshot = summary.snapshot(Instant::now());
                write_point::<D>(
                    writer,
                    PointLine {
                        name: point_name,
                        suffix: Some("sum"),
                        names: &names,
                        values: &values,
                        extra_label: None,
                        value: snapshot.sum,
                    },
                    None,
                    pools,
                )?;
                write_count_line(writer, point_name, &names, &values, snapshot.count, &pools.lines)?;

                for (quantile, value) in snapshot.quantiles {
                    let quantile_str = format_number(quantile, D::force_decimal_point());
                    write_point::<D>(
                        writer,
                        PointLine {
                            name: point_name,
                            suffix: None,
                            names: &names,
                            values: &values,
                            extra_label: Some(("quantile", &quantile_str)),
                            value,
                        },
                        None,
                        pools,
                    )?;
                }
            }
            _ => unreachable!("family metric type pinned at creation"),
        }
    }

    Ok(())
}

fn write_count_line(
    writer: &mut impl Write,
    point_name: &str,
    names: &LabelNames,
    values: &LabelValues,
    count: u64,
    pool: &crate::pool::Pool<String>,
) -> Result<()> {
    let mut line = PooledString::new(pool);
    write_label_set(&mut line, names, values, None);
    writeln!(writer, "{point_name}_count{} {}", line.as_str(), format_u64(count))?;
    Ok(())
}

/// Renders `families` in `format` to `writer`.
pub(crate) fn write_registry(
    families: &[Arc<Family>],
    writer: &mut impl Write,
    format: Format,
    pools: &CollectPools,
) -> Result<()> {
    match format {
        Format::Prometheus => {
            write_registry_generic::<prometheus::PrometheusDialect>(families, writer, pools)
        }
        Format::OpenMetrics => {
            write_registry_generic::<openmetrics::OpenMetricsDialect>(families, writer, pools)
        }
    }
}
