//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Fault-injection policy synchronisation.
    pub chaos: ChaosConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Event trail publishing.
    pub events: EventConfig,

    /// Downstream services keyed by the label used in `/api/{label}/...`.
    pub services: ServicesConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for request/response through the gateway, in seconds.
    /// Must outlive the injected chaos timeout.
    pub request_secs: u64,

    /// Deadline for a single downstream call, in seconds.
    pub upstream_secs: u64,

    /// Downstream connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            upstream_secs: 35,
            connect_secs: 5,
        }
    }
}

/// Fault-injection policy sync configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// Run the background policy sync loop.
    pub sync_enabled: bool,

    /// Base URL of the policy authority (serves `GET /chaos/config`).
    pub service_url: String,

    /// Seconds between scheduled syncs.
    pub sync_interval_secs: u64,

    /// Per-attempt request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Attempts per sync before keeping the previous policy.
    pub max_attempts: u32,

    /// First retry delay in milliseconds; doubles each attempt.
    pub backoff_base_ms: u64,

    /// Upper bound on a single retry delay in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            service_url: "http://chaos-service:8004".to_string(),
            sync_interval_secs: 5,
            request_timeout_secs: 5,
            max_attempts: 5,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

impl ChaosConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Shared counter store. Empty disables the shared store and keeps
    /// counters in-process only.
    pub redis_url: String,

    /// Fixed window length in milliseconds.
    pub window_ms: u64,

    /// Requests admitted per client per window.
    pub max_requests: u64,

    /// Prefix for counter keys in the shared store.
    pub key_prefix: String,

    /// Deadline for a single shared-store round trip in milliseconds.
    pub store_timeout_ms: u64,

    /// Use the first `X-Forwarded-For` entry as client identity.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: "redis://redis:6379".to_string(),
            window_ms: 60_000,
            max_requests: 100,
            key_prefix: "rate_limit:".to_string(),
            store_timeout_ms: 500,
            trust_forwarded_for: false,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Event trail configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventConfig {
    /// Publish chaos and rate-limit events.
    pub enabled: bool,

    /// Base URL of the event sink (serves `POST /chaos/event-publish`).
    pub service_url: String,

    /// Pending events buffered before new ones are dropped.
    pub queue_capacity: usize,

    /// Per-event delivery timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_url: "http://chaos-service:8004".to_string(),
            queue_capacity: 1024,
            timeout_secs: 5,
        }
    }
}

impl EventConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Downstream service map.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ServicesConfig(pub BTreeMap<String, String>);

impl Default for ServicesConfig {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert("auth".to_string(), "http://user-service:8001".to_string());
        services.insert("users".to_string(), "http://user-service:8001".to_string());
        services.insert("products".to_string(), "http://product-service:8002".to_string());
        services.insert("orders".to_string(), "http://order-service:8003".to_string());
        services.insert("chaos".to_string(), "http://chaos-service:8004".to_string());
        Self(services)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable the Prometheus recorder behind `GET /metrics`.
    pub metrics_enabled: bool,

    /// Number of routes listed in the JSON summary.
    pub top_routes: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            top_routes: 5,
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/admin` policy endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
