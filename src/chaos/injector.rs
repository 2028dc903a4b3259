//! Per-request fault decisions.
//!
//! # Decision order
//! ```text
//! policy disabled            → Proceed
//! r < timeout_rate           → Timeout(30s)
//! r < error_rate             → Fail(400 | 500 | 502 | 503)
//! r < error_rate + 0.25      → Delay(uniform latency_min..=latency_max)
//! otherwise                  → Proceed
//! ```
//! All branches test the same draw `r`, so the delay window shrinks as the
//! two rates grow: its effective probability is
//! `max(0, min(0.25, 1 - error_rate - timeout_rate))`. This is the behavior
//! clients of the gateway have always observed and it is kept as is.

use std::sync::Arc;
use std::time::Duration;

use crate::chaos::policy::PolicyHandle;
use crate::events::EventPublisher;
use crate::observability::metrics;

/// Deadline armed by a `Timeout` decision.
pub const INJECTED_TIMEOUT: Duration = Duration::from_secs(30);

/// Status codes a `Fail` decision picks from.
pub const INJECTED_ERROR_CODES: [u16; 4] = [400, 500, 502, 503];

/// Width of the latency branch above `error_rate`.
const LATENCY_WINDOW: f64 = 0.25;

/// The injector's verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    /// Sleep this long, then continue.
    Delay(Duration),
    /// Answer immediately with this status.
    Fail(u16),
    /// Continue, but answer 504 if still in flight after this long.
    Timeout(Duration),
}

/// Source of randomness for decisions.
pub trait RandomSource: Send + Sync {
    /// Uniform draw from `[0, 1)`.
    fn next_f64(&self) -> f64;

    /// Uniform index from `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Production randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastRandom;

impl RandomSource for FastRandom {
    fn next_f64(&self) -> f64 {
        fastrand::f64()
    }

    fn pick(&self, len: usize) -> usize {
        fastrand::usize(..len)
    }
}

pub struct FaultInjector {
    policy: Arc<PolicyHandle>,
    rng: Arc<dyn RandomSource>,
    events: EventPublisher,
}

impl std::fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjector")
            .field("policy", &self.policy.current())
            .finish_non_exhaustive()
    }
}

impl FaultInjector {
    pub fn new(policy: Arc<PolicyHandle>, rng: Arc<dyn RandomSource>, events: EventPublisher) -> Self {
        Self { policy, rng, events }
    }

    /// Decide what happens to a request bound for `service`.
    pub fn decide(&self, service: &str) -> Decision {
        let policy = self.policy.current();
        if !policy.enabled {
            return Decision::Proceed;
        }

        let r = self.rng.next_f64();

        if r < policy.timeout_rate {
            // Counted when the watchdog fires, not here.
            return Decision::Timeout(INJECTED_TIMEOUT);
        }

        if r < policy.error_rate {
            let code = INJECTED_ERROR_CODES[self.rng.pick(INJECTED_ERROR_CODES.len())];
            metrics::record_chaos_error(service, code);
            tracing::info!(service = %service, status = code, "Injecting error");
            self.events.publish("error", format!("HTTP {code}"), service);
            return Decision::Fail(code);
        }

        if r < policy.error_rate + LATENCY_WINDOW {
            let min = policy.latency_min().as_secs_f64();
            let max = policy.latency_max().as_secs_f64();
            let delay = Duration::from_secs_f64(min + self.rng.next_f64() * (max - min));
            metrics::record_chaos_latency(service, delay);
            tracing::info!(service = %service, delay_ms = delay.as_millis() as u64, "Injecting latency");
            self.events
                .publish("latency", format!("{}ms delay", delay.as_millis()), service);
            return Decision::Delay(delay);
        }

        Decision::Proceed
    }

    /// Account for a timeout watchdog that fired for `service`.
    pub fn timeout_fired(&self, service: &str, after: Duration) {
        metrics::record_chaos_timeout(service);
        tracing::warn!(service = %service, after_ms = after.as_millis() as u64, "Injected timeout fired");
        self.events.publish(
            "timeout",
            format!("{service} timeout after {}ms", after.as_millis()),
            service,
        );
    }
}
