//! End-to-end scenarios exercised through the crate's public API: a
//! registry, a factory, and the text serializers together.

use std::sync::Arc;
use std::time::Duration;

use prometheus_registry_core::label::{LabelNames, LabelValues};
use prometheus_registry_core::{Format, MetricFactory, Registry, RegistryBuilder};

fn registry() -> Arc<Registry> {
    Arc::new(RegistryBuilder::new().build())
}

#[test]
fn counter_basic_prometheus_output() {
    let registry = registry();
    let factory = MetricFactory::new(Arc::clone(&registry));

    let counter = factory
        .counter("http_requests_total", "", LabelNames::empty(), &LabelValues::empty())
        .unwrap();

    let pool = factory.exemplar_pool();
    counter.inc(1.0, None, pool, factory.clock().now()).unwrap();
    counter.inc(2.5, None, pool, factory.clock().now()).unwrap();

    let mut buf = Vec::new();
    registry.collect_and_export(&mut buf, Format::Prometheus).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert_eq!(
        text,
        "# HELP http_requests_total \n# TYPE http_requests_total counter\nhttp_requests_total 3.5\n"
    );
}

#[test]
fn histogram_default_bounds_end_to_end() {
    let registry = registry();
    let factory = MetricFactory::new(Arc::clone(&registry));

    let hist = factory
        .histogram("request_duration", "", LabelNames::empty(), &LabelValues::empty(), &[])
        .unwrap();

    let pool = factory.exemplar_pool();
    for v in [0.003, 0.2, 1.5] {
        hist.observe(v, 1, None, pool, factory.clock().now()).unwrap();
    }

    let mut buf = Vec::new();
    registry.collect_and_export(&mut buf, Format::Prometheus).unwrap();
    let text = String::from_utf8(buf).unwrap();

    let expected_buckets = [
        ("0.005", 1), ("0.01", 1), ("0.025", 1), ("0.05", 1), ("0.075", 1), ("0.1", 1),
        ("0.25", 2), ("0.5", 2), ("0.75", 2), ("1", 2), ("2.5", 3), ("5", 3), ("7.5", 3),
        ("10", 3), ("+Inf", 3),
    ];
    for (bound, count) in expected_buckets {
        let needle = format!("request_duration_bucket{{le=\"{bound}\"}} {count}");
        assert!(text.contains(&needle), "missing {needle:?} in:\n{text}");
    }
    assert!(text.contains("request_duration_count 3"));
    assert!(text.contains("request_duration_sum 1.703"));
}

#[test]
fn openmetrics_renames_total_suffixed_counter() {
    let registry = registry();
    let factory = MetricFactory::new(Arc::clone(&registry));

    let counter =
        factory.counter("foo_total", "", LabelNames::empty(), &LabelValues::empty()).unwrap();
    counter.inc(1.0, None, factory.exemplar_pool(), factory.clock().now()).unwrap();

    let mut buf = Vec::new();
    registry.collect_and_export(&mut buf, Format::OpenMetrics).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.starts_with("# HELP foo "));
    assert!(text.contains("# TYPE foo counter\n"));
    assert!(text.contains("foo_total 1.0"));
    assert!(text.ends_with("# EOF\n"));
}

#[test]
fn label_value_escaping() {
    let registry = registry();
    let factory = MetricFactory::new(Arc::clone(&registry));

    let names = LabelNames::new(["k"]).unwrap();
    let values = LabelValues::new(["a\"\\\nb"]);
    let counter = factory.counter("x", "", names, &values).unwrap();
    counter.inc(1.0, None, factory.exemplar_pool(), factory.clock().now()).unwrap();

    let mut buf = Vec::new();
    registry.collect_and_export(&mut buf, Format::Prometheus).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.contains(r#"k="a\"\\\nb""#), "unexpected escaping in:\n{text}");
}

#[test]
fn managed_lifetime_expires_idle_entries_and_discards_their_state() {
    use prometheus_registry_core::RegistryConfig;

    let (clock, mock) = quanta::Clock::mock();
    let registry = Arc::new(Registry::with_clock(RegistryConfig::default(), clock));
    let factory = MetricFactory::new(Arc::clone(&registry));

    let names = LabelNames::new(["shard"]).unwrap();
    let counter = factory
        .managed_counter("sessions_total", "", names, Duration::from_secs(60))
        .unwrap();
    let key = LabelValues::new(["A"]);

    counter.with_lease(&key, |c| c.inc_to(42.0)).unwrap();
    assert_eq!(counter.live_count(), 1);

    let mut buf = Vec::new();
    registry.collect_and_export(&mut buf, Format::Prometheus).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.lines().any(|l| l.starts_with("sessions_total{shard=\"A\"} 42")), "{text}");

    mock.increment(Duration::from_secs(61));
    counter.sweep_once(factory.clock().now());
    assert_eq!(counter.live_count(), 0);

    let mut buf = Vec::new();
    registry.collect_and_export(&mut buf, Format::Prometheus).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(
        !text.lines().any(|l| l.starts_with("sessions_total{shard=\"A\"}")),
        "reaped key must not still be exported:\n{text}"
    );

    let fresh_value = counter.with_lease(&key, |c| c.value()).unwrap();
    assert_eq!(fresh_value, 0.0, "reaped entry must not resurrect its old value");
}

#[test]
fn summary_reports_quantiles_over_observed_range() {
    let registry = Arc::new(
        RegistryBuilder::new()
            .default_summary_targets(&[(0.5, 0.05), (0.9, 0.01)])
            .build(),
    );
    let factory = MetricFactory::new(Arc::clone(&registry));

    let summary =
        factory.summary("rt", "", LabelNames::empty(), &LabelValues::empty()).unwrap();

    for v in 1..=100 {
        summary.observe(v as f64, factory.clock().now());
    }

    let mut buf = Vec::new();
    registry.collect_and_export(&mut buf, Format::Prometheus).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.contains("rt_sum 5050"));
    assert!(text.contains("rt_count 100"));

    let p50 = extract_quantile_value(&text, "0.5");
    assert!((45.0..=55.0).contains(&p50), "p50 = {p50}");
    let p90 = extract_quantile_value(&text, "0.9");
    assert!((89.0..=91.0).contains(&p90), "p90 = {p90}");
}

fn extract_quantile_value(text: &str, quantile: &str) -> f64 {
    let needle = format!("rt{{quantile=\"{quantile}\"}} ");
    let line = text.lines().find(|l| l.starts_with(&needle)).expect("quantile line present");
    line[needle.len()..].parse().unwrap()
}
