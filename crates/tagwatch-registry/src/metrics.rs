//! Prometheus metrics for registry traffic.
//!
//! Metrics are observable side effects only; no functional contract depends
//! on them. They register against the default process registry so the
//! embedding process can expose them however it likes.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

/// Total registry requests by endpoint and response status.
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tagwatch_registry_requests_total",
        "Total registry API requests",
        &["registry", "status"]
    )
    .expect("metric registration")
});

/// Registry request duration by endpoint.
pub static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tagwatch_registry_request_duration_seconds",
        "Registry API request duration in seconds",
        &["registry"]
    )
    .expect("metric registration")
});

/// Requests currently in flight by endpoint.
pub static INFLIGHT_REQUESTS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tagwatch_registry_inflight_requests",
        "Registry API requests currently in flight",
        &["registry"]
    )
    .expect("metric registration")
});

/// Requests that had to wait on the per-endpoint rate limiter.
pub static RATE_LIMIT_WAITS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tagwatch_registry_rate_limit_waits_total",
        "Requests delayed by the per-endpoint rate limiter",
        &["registry"]
    )
    .expect("metric registration")
});

/// Bearer-token fetch attempts by endpoint and outcome class.
pub static TOKEN_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tagwatch_registry_token_fetches_total",
        "Bearer token fetch attempts by outcome",
        &["registry", "outcome"]
    )
    .expect("metric registration")
});

/// Bearer-token fetch duration by endpoint.
pub static TOKEN_FETCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tagwatch_registry_token_fetch_duration_seconds",
        "Bearer token fetch duration in seconds",
        &["registry"]
    )
    .expect("metric registration")
});

/// Advertised token lifetime by endpoint, when the auth service reports one.
pub static TOKEN_TTL: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tagwatch_registry_token_ttl_seconds",
        "Advertised bearer token lifetime in seconds",
        &["registry"]
    )
    .expect("metric registration")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        REQUESTS_TOTAL.with_label_values(&["test", "200"]).inc();
        REQUEST_DURATION.with_label_values(&["test"]).observe(0.01);
        INFLIGHT_REQUESTS.with_label_values(&["test"]).set(0);
        RATE_LIMIT_WAITS.with_label_values(&["test"]).inc();
        TOKEN_FETCHES.with_label_values(&["test", "success"]).inc();
        TOKEN_FETCH_DURATION
            .with_label_values(&["test"])
            .observe(0.01);
        TOKEN_TTL.with_label_values(&["test"]).observe(300.0);
    }
}
