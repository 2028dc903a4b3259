//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, injected faults, rate limits)
//! - Install the Prometheus recorder backing `GET /metrics`
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, route, status
//! - `http_request_duration_seconds` (histogram): end-to-end latency
//! - `upstream_service_latency_seconds` (histogram): downstream call latency
//! - `upstream_service_errors_total` (counter): downstream 4xx/5xx and transport errors
//! - `chaos_injected_errors_total` (counter): by service and status code
//! - `chaos_injected_timeouts_total` (counter): by service
//! - `chaos_injected_latency_ms` (histogram): by service
//! - `rate_limit_exceeded_total` (counter): by reason
//! - `gateway_rate_limit_store_fallbacks_total` (counter)
//! - `gateway_policy_syncs_total` (counter): by result
//! - `gateway_events_dropped_total` (counter): by reason
//!
//! # Design Decisions
//! - Route labels use the service label, not the raw path, to bound cardinality
//! - Recording before the recorder is installed is a silent no-op

use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const REQUEST_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0];
const UPSTREAM_BUCKETS: &[f64] = &[0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];
const CHAOS_LATENCY_BUCKETS: &[f64] = &[0.0, 100.0, 500.0, 1000.0, 2000.0, 5000.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_request_duration_seconds".to_string()),
            REQUEST_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("upstream_service_latency_seconds".to_string()),
            UPSTREAM_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("chaos_injected_latency_ms".to_string()),
            CHAOS_LATENCY_BUCKETS,
        )
}

/// Install the global Prometheus recorder and return its render handle.
///
/// A process only gets one global recorder. If one is already installed the
/// returned handle belongs to a detached recorder and renders nothing.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    match builder()?.install_recorder() {
        Ok(handle) => {
            tracing::info!("Prometheus recorder installed");
            Ok(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder already installed, using detached handle");
            Ok(builder()?.build_recorder().handle())
        }
    }
}

pub fn record_request(method: &str, route: &str, status: u16, latency: Duration) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .record(latency.as_secs_f64());
}

pub fn record_upstream(service: &str, status: Option<u16>, latency: Duration) {
    histogram!("upstream_service_latency_seconds", "service" => service.to_string())
        .record(latency.as_secs_f64());

    match status {
        Some(code) if code < 400 => {}
        Some(code) => counter!(
            "upstream_service_errors_total",
            "service" => service.to_string(),
            "status_code" => code.to_string()
        )
        .increment(1),
        None => counter!(
            "upstream_service_errors_total",
            "service" => service.to_string(),
            "status_code" => "transport"
        )
        .increment(1),
    }
}

pub fn record_chaos_error(service: &str, status: u16) {
    counter!(
        "chaos_injected_errors_total",
        "service" => service.to_string(),
        "error_code" => status.to_string()
    )
    .increment(1);
}

pub fn record_chaos_timeout(service: &str) {
    counter!("chaos_injected_timeouts_total", "service" => service.to_string()).increment(1);
}

pub fn record_chaos_latency(service: &str, delay: Duration) {
    histogram!(
        "chaos_injected_latency_ms",
        "service" => service.to_string(),
        "type" => "injected"
    )
    .record(delay.as_secs_f64() * 1000.0);
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("rate_limit_exceeded_total", "reason" => reason).increment(1);
}

pub fn record_store_fallback(store: &'static str) {
    counter!("gateway_rate_limit_store_fallbacks_total", "store" => store).increment(1);
}

pub fn record_policy_sync(result: &'static str) {
    counter!("gateway_policy_syncs_total", "result" => result).increment(1);
}

pub fn record_event_dropped(reason: &'static str) {
    counter!("gateway_events_dropped_total", "reason" => reason).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("GET", "products", 200, Duration::from_millis(12));
        record_upstream("products", None, Duration::from_millis(3));
        record_chaos_error("products", 503);
        record_rate_limited("window");
    }

    #[test]
    fn test_builder_accepts_bucket_layout() {
        assert!(builder().is_ok());
    }
}
