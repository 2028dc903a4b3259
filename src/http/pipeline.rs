//! Per-request resilience pipeline.
//!
//! # Stage order
//! ```text
//! start timer, arm request deadline
//!   → FaultInjector::decide
//!       Fail     → injected error response
//!       Delay    → sleep, then continue
//!       Timeout  → arm watchdog over everything below
//!   → RateLimiter::admit
//!       Rejected → 429
//!   → downstream call (next layer)
//! → MetricsAggregator::record_request (exactly once)
//! ```
//!
//! When the watchdog fires, the in-flight downstream future is dropped and
//! the request is recorded as a 504. The overall request deadline works the
//! same way and is recorded as a 408, so every request ends in exactly one
//! record.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::chaos::{Decision, FaultInjector};
use crate::http::response;
use crate::observability::{MetricsAggregator, RequestOutcome};
use crate::resilience::{race_deadline, Race};
use crate::routing::service_label;
use crate::security::{client_identity, RateLimitDecision, RateLimiter};

const AUTH_SERVICE: &str = "auth";

#[derive(Debug, Clone)]
pub struct RequestPipeline {
    injector: Arc<FaultInjector>,
    limiter: Arc<RateLimiter>,
    aggregator: Arc<MetricsAggregator>,
    trust_forwarded_for: bool,
    request_timeout: Duration,
}

impl RequestPipeline {
    pub fn new(
        injector: Arc<FaultInjector>,
        limiter: Arc<RateLimiter>,
        aggregator: Arc<MetricsAggregator>,
        trust_forwarded_for: bool,
        request_timeout: Duration,
    ) -> Self {
        Self {
            injector,
            limiter,
            aggregator,
            trust_forwarded_for,
            request_timeout,
        }
    }

    pub async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();
        let path = request.uri().path().to_string();
        let service = service_label(&path).to_string();

        let stages = self.run_stages(request, next, &service, &path);
        let response = match race_deadline(Some(self.request_timeout), stages).await {
            Race::Completed(response) => response,
            Race::TimedOut => {
                tracing::warn!(
                    service = %service,
                    path = %path,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Request deadline exceeded"
                );
                response::request_timeout()
            }
        };

        let status = response.status().as_u16();
        if service == AUTH_SERVICE {
            self.aggregator
                .record_auth_attempt(status != 401 && status != 403);
        }
        self.aggregator.record_request(RequestOutcome {
            method,
            route: path,
            status,
            latency: start.elapsed(),
            service,
        });

        response
    }

    async fn run_stages(&self, request: Request<Body>, next: Next, service: &str, path: &str) -> Response {
        match self.injector.decide(service) {
            Decision::Proceed => self.admit_and_forward(request, next, path).await,
            Decision::Fail(code) => response::chaos_error(code),
            Decision::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.admit_and_forward(request, next, path).await
            }
            Decision::Timeout(deadline) => {
                match race_deadline(Some(deadline), self.admit_and_forward(request, next, path)).await {
                    Race::Completed(response) => response,
                    Race::TimedOut => {
                        self.injector.timeout_fired(service, deadline);
                        response::chaos_timeout()
                    }
                }
            }
        }
    }

    async fn admit_and_forward(&self, request: Request<Body>, next: Next, path: &str) -> Response {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client = client_identity(request.headers(), peer, self.trust_forwarded_for);

        let decision = self.limiter.admit(&client, path).await;
        let mut response = if decision.is_admitted() {
            next.run(request).await
        } else {
            response::rate_limited()
        };

        if decision.enforced {
            apply_rate_limit_headers(&mut response, &decision);
        }
        response
    }
}

fn apply_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let reset_secs = decision.reset_after.as_secs_f64().ceil() as u64;
    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static("ratelimit-limit"), HeaderValue::from(decision.limit));
    headers.insert(
        HeaderName::from_static("ratelimit-remaining"),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(HeaderName::from_static("ratelimit-reset"), HeaderValue::from(reset_secs));
}

/// Axum adapter for [`RequestPipeline::handle`].
pub async fn pipeline_middleware(
    State(pipeline): State<RequestPipeline>,
    request: Request<Body>,
    next: Next,
) -> Response {
    pipeline.handle(request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{FastRandom, FaultPolicy, PolicyHandle, RandomSource, INJECTED_TIMEOUT};
    use crate::config::RateLimitConfig;
    use crate::events::EventPublisher;
    use axum::{
        http::{StatusCode, Uri},
        middleware,
        response::IntoResponse,
        routing::any,
        Router,
    };
    use std::time::Duration;
    use tower::ServiceExt;

    /// Always draws the same value.
    struct Fixed(f64);

    impl RandomSource for Fixed {
        fn next_f64(&self) -> f64 {
            self.0
        }

        fn pick(&self, _len: usize) -> usize {
            1
        }
    }

    struct Harness {
        app: Router,
        aggregator: Arc<MetricsAggregator>,
    }

    fn harness(policy: FaultPolicy, rng: Arc<dyn RandomSource>, max_requests: u64, downstream_delay: Duration) -> Harness {
        let aggregator = Arc::new(MetricsAggregator::new());
        let injector = Arc::new(FaultInjector::new(
            Arc::new(PolicyHandle::new(policy)),
            rng,
            EventPublisher::disabled(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            &RateLimitConfig {
                max_requests,
                ..RateLimitConfig::default()
            },
            None,
            aggregator.clone(),
            EventPublisher::disabled(),
        ));
        let pipeline = RequestPipeline::new(
            injector,
            limiter,
            aggregator.clone(),
            false,
            Duration::from_secs(60),
        );

        let app = Router::new()
            .route(
                "/api/{*rest}",
                any(move |uri: Uri| async move {
                    tokio::time::sleep(downstream_delay).await;
                    if uri.path() == "/api/auth/login" {
                        StatusCode::UNAUTHORIZED.into_response()
                    } else {
                        "downstream".into_response()
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(pipeline, pipeline_middleware));

        Harness { app, aggregator }
    }

    fn policy(error_rate: f64, timeout_rate: f64) -> FaultPolicy {
        FaultPolicy {
            enabled: true,
            error_rate,
            timeout_rate,
            latency_min_ms: 1000,
            latency_max_ms: 1000,
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_proceed_reaches_downstream_with_headers() {
        let h = harness(FaultPolicy::default(), Arc::new(FastRandom), 100, Duration::ZERO);

        let response = h.app.clone().oneshot(get("/api/products/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["ratelimit-limit"], "100");
        assert_eq!(response.headers()["ratelimit-remaining"], "99");
        assert_eq!(response.headers()["ratelimit-reset"], "60");

        let snapshot = h.aggregator.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.routes[0].0, "GET /api/products/1");
    }

    #[tokio::test]
    async fn test_injected_error_short_circuits() {
        let h = harness(policy(1.0, 0.0), Arc::new(Fixed(0.5)), 100, Duration::ZERO);

        let response = h.app.clone().oneshot(get("/api/orders")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // No rate limit headers: the limiter never ran.
        assert!(response.headers().get("ratelimit-limit").is_none());

        let snapshot = h.aggregator.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.failure_count, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_request_recorded_once() {
        let h = harness(FaultPolicy::default(), Arc::new(FastRandom), 1, Duration::ZERO);

        let first = h.app.clone().oneshot(get("/api/users/1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = h.app.clone().oneshot(get("/api/users/1")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()["ratelimit-remaining"], "0");

        let snapshot = h.aggregator.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.rate_limit_hits, 1);
        assert_eq!(snapshot.status_codes.get(&429), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_then_continue() {
        // 0.1 falls in the delay window [0, 0.25) with both rates at zero.
        let h = harness(policy(0.0, 0.0), Arc::new(Fixed(0.1)), 100, Duration::ZERO);

        let start = tokio::time::Instant::now();
        let response = h.app.clone().oneshot(get("/api/products")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_overrides_slow_downstream() {
        let h = harness(policy(0.0, 1.0), Arc::new(Fixed(0.5)), 100, Duration::from_secs(120));

        let start = tokio::time::Instant::now();
        let response = h.app.clone().oneshot(get("/api/products/2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(start.elapsed(), INJECTED_TIMEOUT);

        let snapshot = h.aggregator.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.status_codes.get(&504), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_cancelled_by_fast_downstream() {
        let h = harness(policy(0.0, 1.0), Arc::new(Fixed(0.5)), 100, Duration::from_secs(2));

        let response = h.app.clone().oneshot(get("/api/products/3")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Let any stray timer run out; nothing more may be recorded.
        tokio::time::sleep(INJECTED_TIMEOUT * 2).await;
        let snapshot = h.aggregator.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.status_codes.get(&200), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_is_recorded() {
        let mut slow = policy(0.0, 0.0);
        slow.latency_min_ms = 61_000;
        slow.latency_max_ms = 61_000;
        let h = harness(slow, Arc::new(Fixed(0.1)), 100, Duration::ZERO);

        let start = tokio::time::Instant::now();
        let response = h.app.clone().oneshot(get("/api/products/4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        let snapshot = h.aggregator.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.status_codes.get(&408), Some(&1));
    }

    #[tokio::test]
    async fn test_auth_routes_count_attempts() {
        let h = harness(FaultPolicy::default(), Arc::new(FastRandom), 100, Duration::ZERO);

        h.app.clone().oneshot(get("/api/auth/login")).await.unwrap();
        h.app.clone().oneshot(get("/api/auth/refresh")).await.unwrap();
        h.app.clone().oneshot(get("/api/products")).await.unwrap();

        let snapshot = h.aggregator.snapshot();
        assert_eq!(snapshot.auth_attempts, 2);
        assert_eq!(snapshot.auth_failures, 1);
    }
}
