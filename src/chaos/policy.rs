//! Fault-injection policy and its process-wide snapshot.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// The live fault-injection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPolicy {
    pub enabled: bool,
    /// Probability of a synthetic error response.
    pub error_rate: f64,
    /// Probability of arming the gateway-timeout watchdog.
    pub timeout_rate: f64,
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
}

impl Default for FaultPolicy {
    /// Safe startup policy: injects nothing.
    fn default() -> Self {
        Self {
            enabled: false,
            error_rate: 0.0,
            timeout_rate: 0.0,
            latency_min_ms: 0,
            latency_max_ms: 0,
        }
    }
}

impl FaultPolicy {
    pub fn latency_min(&self) -> Duration {
        Duration::from_millis(self.latency_min_ms)
    }

    pub fn latency_max(&self) -> Duration {
        Duration::from_millis(self.latency_max_ms)
    }

    /// Clamp each rate into `[0, 1]` and order the latency bounds.
    ///
    /// The sum of the two rates is left alone: the decision order already
    /// gives timeouts precedence over errors when they overlap.
    pub fn normalized(mut self) -> Self {
        self.error_rate = clamp_rate(self.error_rate);
        self.timeout_rate = clamp_rate(self.timeout_rate);
        if self.latency_min_ms > self.latency_max_ms {
            std::mem::swap(&mut self.latency_min_ms, &mut self.latency_max_ms);
        }
        self
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Shared handle to the current policy.
///
/// Writers publish a whole new snapshot; readers take an `Arc` to whichever
/// snapshot is current and keep using it for the rest of their decision.
#[derive(Debug)]
pub struct PolicyHandle {
    current: ArcSwap<FaultPolicy>,
}

impl PolicyHandle {
    pub fn new(policy: FaultPolicy) -> Self {
        Self {
            current: ArcSwap::from_pointee(policy.normalized()),
        }
    }

    /// Snapshot of the policy in force right now.
    pub fn current(&self) -> Arc<FaultPolicy> {
        self.current.load_full()
    }

    /// Atomically replace the policy.
    pub fn replace(&self, policy: FaultPolicy) {
        let policy = policy.normalized();
        tracing::debug!(
            enabled = policy.enabled,
            error_rate = policy.error_rate,
            timeout_rate = policy.timeout_rate,
            latency_min_ms = policy.latency_min_ms,
            latency_max_ms = policy.latency_max_ms,
            "Fault policy replaced"
        );
        self.current.store(Arc::new(policy));
    }
}

impl Default for PolicyHandle {
    fn default() -> Self {
        Self::new(FaultPolicy::default())
    }
}
