//! # Metrics
//!
//! Prometheus metrics for the controller and the broker ingress.
//!
//! ## Metrics Exposed
//!
//! - `topic_reconciliations_total` - Total number of reconciliations
//! - `topic_reconciliation_errors_total` - Total number of reconciliation errors
//! - `topic_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `topic_operations_total` - Backend topic operations by operation type
//! - `ingress_event_count` - Events seen by the ingress, by target and outcome
//! - `ingress_event_dispatch_latencies_seconds` - Time from request arrival to
//!   decouple-sink completion, by target and outcome

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;
use std::time::Duration;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "topic_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "topic_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "topic_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static TOPIC_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "topic_operations_total",
            "Total number of backend topic operations by operation type",
        ),
        &["operation"],
    )
    .expect("Failed to create TOPIC_OPERATIONS_TOTAL metric - this should never happen")
});

static EVENT_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "ingress_event_count",
            "Events seen by the broker ingress",
        ),
        &["namespace", "broker", "event_type", "response_code"],
    )
    .expect("Failed to create EVENT_COUNT metric - this should never happen")
});

static EVENT_DISPATCH_LATENCIES: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "ingress_event_dispatch_latencies_seconds",
            "Time from request arrival to decouple-sink completion",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["namespace", "broker", "event_type", "response_code"],
    )
    .expect("Failed to create EVENT_DISPATCH_LATENCIES metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(TOPIC_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVENT_COUNT.clone()))?;
    REGISTRY.register(Box::new(EVENT_DISPATCH_LATENCIES.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_topic_operations(operation: &str) {
    TOPIC_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

/// Records one dispatch sample for an ingress request. Called exactly once
/// per request whose target key was parsed, on every exit path.
pub fn record_event_dispatch(
    namespace: &str,
    broker: &str,
    event_type: &str,
    response_code: u16,
    elapsed: Duration,
) {
    let code = response_code.to_string();
    let labels = &[namespace, broker, event_type, code.as_str()];
    EVENT_COUNT.with_label_values(labels).inc();
    EVENT_DISPATCH_LATENCIES
        .with_label_values(labels)
        .observe(elapsed.as_secs_f64());
}

/// Sample count for one dispatch label set. Test hook.
#[cfg(test)]
pub(crate) fn event_dispatch_samples(
    namespace: &str,
    broker: &str,
    event_type: &str,
    response_code: u16,
) -> u64 {
    let code = response_code.to_string();
    EVENT_COUNT
        .with_label_values(&[namespace, broker, event_type, code.as_str()])
        .get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        let after = RECONCILIATIONS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL.get();
        increment_reconciliation_errors();
        let after = RECONCILIATION_ERRORS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration(1.5);
        // Just verify it doesn't panic - histogram observation doesn't return a value
    }

    #[test]
    fn test_increment_topic_operations() {
        let before = TOPIC_OPERATIONS_TOTAL.with_label_values(&["create"]).get();
        increment_topic_operations("create");
        let after = TOPIC_OPERATIONS_TOTAL.with_label_values(&["create"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_record_event_dispatch() {
        let before = event_dispatch_samples("ns-metrics", "br", "t", 202);
        record_event_dispatch("ns-metrics", "br", "t", 202, Duration::from_millis(7));
        let after = event_dispatch_samples("ns-metrics", "br", "t", 202);
        assert_eq!(after, before + 1u64);
    }
}
