//! In-process request statistics.
//!
//! The pipeline calls `record_request()` once per finished request and the
//! metrics endpoints call `snapshot()` / `summary()`. Writes take a short
//! lock; derived figures (averages, percentiles, rankings) are computed on a
//! copied snapshot outside it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::observability::metrics;

// ─── Configuration ───────────────────────────────────────────────

/// Recent latencies kept for averages and percentiles.
pub const LATENCY_SAMPLE_CAPACITY: usize = 1000;

/// Recent latencies kept per downstream service.
pub const DOWNSTREAM_SAMPLE_CAPACITY: usize = 1000;

const P95_MIN_SAMPLES: usize = 20;
const P99_MIN_SAMPLES: usize = 100;

// ─── Public types ────────────────────────────────────────────────

/// One completed request, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub method: String,
    /// Exact request path, e.g. `/api/products/1`.
    pub route: String,
    pub status: u16,
    pub latency: Duration,
    /// First segment of the proxied sub-route, e.g. `products`.
    pub service: String,
}

/// A latency observation tagged with its arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyEntry {
    /// Zero-based index of the request that produced it.
    pub seq: u64,
    pub latency: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteStats {
    pub count: u64,
    pub total_latency: Duration,
    pub errors: u64,
}

/// Aggregate downstream latency for one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownstreamStats {
    pub service: String,
    pub samples: usize,
    pub average_latency_ms: f64,
}

/// Row of the top-routes ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    pub route: String,
    pub requests: u64,
    pub average_latency_ms: f64,
    pub errors: u64,
}

/// Read-only view of everything accumulated so far.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub status_codes: BTreeMap<u16, u64>,
    /// `"{method} {path}"` keys in first-seen order.
    pub routes: Vec<(String, RouteStats)>,
    /// Oldest first.
    pub latency_sample: Vec<LatencyEntry>,
    pub downstream: Vec<DownstreamStats>,
    pub auth_attempts: u64,
    pub auth_failures: u64,
    pub rate_limit_hits: u64,
}

/// JSON body of `GET /metrics/summary`.
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySummary {
    pub service: &'static str,
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate_percent: f64,
    pub request_rate_per_sec: f64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub status_codes: BTreeMap<u16, u64>,
    pub auth_attempts: u64,
    pub auth_failures: u64,
    pub auth_success_rate: f64,
    pub rate_limit_hits: u64,
    pub downstream_services: Vec<DownstreamStats>,
    pub top_routes: Vec<RouteSummary>,
    pub timestamp: String,
}

// ─── Internal state ──────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    status_codes: BTreeMap<u16, u64>,

    // Insertion-ordered route table
    route_index: HashMap<String, usize>,
    routes: Vec<(String, RouteStats)>,

    latencies: VecDeque<LatencyEntry>,

    // Insertion-ordered downstream samples
    downstream_index: HashMap<String, usize>,
    downstream: Vec<(String, VecDeque<Duration>)>,
}

// ─── MetricsAggregator impl ──────────────────────────────────────

/// Thread-safe request statistics, one per process.
pub struct MetricsAggregator {
    started: Instant,
    inner: Mutex<Inner>,
    auth_attempts: AtomicU64,
    auth_failures: AtomicU64,
    rate_limit_hits: AtomicU64,
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("total_requests", &self.inner.lock().total_requests)
            .finish_non_exhaustive()
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(Inner::default()),
            auth_attempts: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
        }
    }

    /// Record a finished request. Statuses >= 400 count as failures.
    pub fn record_request(&self, outcome: RequestOutcome) {
        let failed = outcome.status >= 400;
        let route_key = format!("{} {}", outcome.method, outcome.route);

        {
            let mut inner = self.inner.lock();
            let seq = inner.total_requests;
            inner.total_requests += 1;
            if failed {
                inner.failure_count += 1;
            } else {
                inner.success_count += 1;
            }
            *inner.status_codes.entry(outcome.status).or_insert(0) += 1;

            inner.latencies.push_back(LatencyEntry {
                seq,
                latency: outcome.latency,
            });
            if inner.latencies.len() > LATENCY_SAMPLE_CAPACITY {
                inner.latencies.pop_front();
            }

            let stats = inner.route_mut(route_key);
            stats.count += 1;
            stats.total_latency += outcome.latency;
            if failed {
                stats.errors += 1;
            }
        }

        metrics::record_request(&outcome.method, &outcome.service, outcome.status, outcome.latency);
        tracing::debug!(
            method = %outcome.method,
            path = %outcome.route,
            status = outcome.status,
            duration_ms = outcome.latency.as_millis() as u64,
            "Request completed"
        );
    }

    /// Record the latency of one downstream call.
    pub fn record_downstream_latency(&self, service: &str, latency: Duration) {
        let mut inner = self.inner.lock();
        let samples = inner.downstream_mut(service);
        samples.push_back(latency);
        if samples.len() > DOWNSTREAM_SAMPLE_CAPACITY {
            samples.pop_front();
        }
    }

    pub fn record_auth_attempt(&self, success: bool) {
        self.auth_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.auth_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Average latency of the recent downstream calls to `service`.
    pub fn average_downstream_latency(&self, service: &str) -> Duration {
        let inner = self.inner.lock();
        inner
            .downstream_index
            .get(service)
            .map(|&i| average(inner.downstream[i].1.iter().copied()))
            .unwrap_or_default()
    }

    /// Copy the current state. Never mutates it.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            uptime: self.started.elapsed(),
            total_requests: inner.total_requests,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            status_codes: inner.status_codes.clone(),
            routes: inner.routes.clone(),
            latency_sample: inner.latencies.iter().copied().collect(),
            downstream: inner
                .downstream
                .iter()
                .map(|(service, samples)| DownstreamStats {
                    service: service.clone(),
                    samples: samples.len(),
                    average_latency_ms: as_ms(average(samples.iter().copied())),
                })
                .collect(),
            auth_attempts: self.auth_attempts.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }

    /// Routes ranked by request count, ties in first-seen order.
    pub fn top_routes(&self, limit: usize) -> Vec<RouteSummary> {
        self.snapshot().top_routes(limit)
    }

    pub fn summary(&self, top_routes: usize) -> GatewaySummary {
        self.snapshot().summary(top_routes)
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn route_mut(&mut self, key: String) -> &mut RouteStats {
        let index = match self.route_index.get(&key) {
            Some(&i) => i,
            None => {
                let i = self.routes.len();
                self.route_index.insert(key.clone(), i);
                self.routes.push((key, RouteStats::default()));
                i
            }
        };
        &mut self.routes[index].1
    }

    fn downstream_mut(&mut self, service: &str) -> &mut VecDeque<Duration> {
        let index = match self.downstream_index.get(service) {
            Some(&i) => i,
            None => {
                let i = self.downstream.len();
                self.downstream_index.insert(service.to_string(), i);
                self.downstream.push((service.to_string(), VecDeque::new()));
                i
            }
        };
        &mut self.downstream[index].1
    }
}

// ─── Snapshot derivations ────────────────────────────────────────

impl MetricsSnapshot {
    fn sorted_latencies(&self) -> Vec<Duration> {
        let mut sorted: Vec<Duration> = self.latency_sample.iter().map(|e| e.latency).collect();
        sorted.sort_unstable();
        sorted
    }

    pub fn average_latency(&self) -> Duration {
        average(self.latency_sample.iter().map(|e| e.latency))
    }

    /// Zero until 20 samples exist.
    pub fn p95_latency(&self) -> Duration {
        percentile(&self.sorted_latencies(), 0.95, P95_MIN_SAMPLES)
    }

    /// Zero until 100 samples exist.
    pub fn p99_latency(&self) -> Duration {
        percentile(&self.sorted_latencies(), 0.99, P99_MIN_SAMPLES)
    }

    pub fn error_rate_percent(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_requests as f64 * 100.0
    }

    /// Successful share of auth attempts; 100 when there were none.
    pub fn auth_success_rate(&self) -> f64 {
        if self.auth_attempts == 0 {
            return 100.0;
        }
        (self.auth_attempts - self.auth_failures) as f64 / self.auth_attempts as f64 * 100.0
    }

    pub fn request_rate_per_sec(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.total_requests as f64 / secs
        } else {
            0.0
        }
    }

    pub fn top_routes(&self, limit: usize) -> Vec<RouteSummary> {
        let mut ranked: Vec<&(String, RouteStats)> = self.routes.iter().collect();
        // Stable: equal counts stay in first-seen order.
        ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count));
        ranked
            .into_iter()
            .take(limit)
            .map(|(route, stats)| RouteSummary {
                route: route.clone(),
                requests: stats.count,
                average_latency_ms: if stats.count == 0 {
                    0.0
                } else {
                    as_ms(stats.total_latency) / stats.count as f64
                },
                errors: stats.errors,
            })
            .collect()
    }

    pub fn summary(&self, top_routes: usize) -> GatewaySummary {
        GatewaySummary {
            service: "api-gateway",
            uptime_seconds: self.uptime.as_secs_f64(),
            total_requests: self.total_requests,
            successful_requests: self.success_count,
            failed_requests: self.failure_count,
            error_rate_percent: self.error_rate_percent(),
            request_rate_per_sec: self.request_rate_per_sec(),
            average_latency_ms: as_ms(self.average_latency()),
            p95_latency_ms: as_ms(self.p95_latency()),
            p99_latency_ms: as_ms(self.p99_latency()),
            status_codes: self.status_codes.clone(),
            auth_attempts: self.auth_attempts,
            auth_failures: self.auth_failures,
            auth_success_rate: self.auth_success_rate(),
            rate_limit_hits: self.rate_limit_hits,
            downstream_services: self.downstream.clone(),
            top_routes: self.top_routes(top_routes),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Value at index `floor(n * p)` of an ascending sample, or zero when the
/// sample is smaller than `min_samples`.
pub fn percentile(sorted: &[Duration], p: f64, min_samples: usize) -> Duration {
    if sorted.is_empty() || sorted.len() < min_samples {
        return Duration::ZERO;
    }
    let index = (sorted.len() as f64 * p).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

fn average(samples: impl Iterator<Item = Duration>) -> Duration {
    let (sum, count) = samples.fold((Duration::ZERO, 0u32), |(sum, n), d| (sum + d, n + 1));
    if count == 0 {
        Duration::ZERO
    } else {
        sum / count
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}
