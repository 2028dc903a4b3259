//! Fixed-window rate limiting backed by a shared counter store.
//!
//! Every gateway instance increments the same Redis key for a client, so the
//! budget is shared. When Redis cannot be reached the limiter keeps counting
//! in process memory. That fallback budget is per instance, so a fleet of N
//! gateways admits up to N times the limit while degraded.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::events::EventPublisher;
use crate::observability::metrics;
use crate::observability::MetricsAggregator;

/// Purge expired local windows once the map grows past this many clients.
const LOCAL_PURGE_THRESHOLD: usize = 10_000;

const INCR_WINDOW_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("counter store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Counter state after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the window resets.
    pub reset_after: Duration,
}

/// Atomic fixed-window counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, starting a fresh window of `window` if none is open.
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;
}

/// Redis-backed counters shared by every gateway instance.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Arc<redis::Script>,
    timeout: Duration,
}

impl RedisCounterStore {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;
        Ok(Self {
            conn,
            script: Arc::new(redis::Script::new(INCR_WINDOW_SCRIPT)),
            timeout,
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis() as u64;
        let mut invocation = self.script.key(key);
        invocation.arg(window_ms);
        let call = invocation.invoke_async::<_, (u64, i64)>(&mut conn);

        let (count, ttl_ms) = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))??;

        Ok(WindowCount {
            count,
            reset_after: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }
}

/// In-process fixed windows, one instance's view only.
#[derive(Debug, Default)]
pub struct LocalWindowStore {
    windows: DashMap<String, (Instant, u64)>,
}

impl LocalWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self, now: Instant, window: Duration) {
        self.windows.retain(|_, (start, _)| now < *start + window);
    }

    fn incr_at(&self, key: &str, window: Duration, now: Instant) -> WindowCount {
        if self.windows.len() > LOCAL_PURGE_THRESHOLD {
            self.purge_expired(now, window);
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert((now, 0));
        let (start, count) = entry.value_mut();
        if now >= *start + window {
            *start = now;
            *count = 0;
        }
        *count += 1;

        WindowCount {
            count: *count,
            reset_after: (*start + window).saturating_duration_since(now),
        }
    }
}

#[async_trait]
impl CounterStore for LocalWindowStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        Ok(self.incr_at(key, window, Instant::now()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

/// Outcome of one admission check, with the values for the
/// `RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub admission: Admission,
    /// False when limiting is switched off; no headers are emitted then.
    pub enforced: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

impl RateLimitDecision {
    fn unlimited() -> Self {
        Self {
            admission: Admission::Admitted,
            enforced: false,
            limit: 0,
            remaining: 0,
            reset_after: Duration::ZERO,
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.admission == Admission::Admitted
    }
}

pub struct RateLimiter {
    enabled: bool,
    limit: u64,
    window: Duration,
    key_prefix: String,
    shared: Option<Arc<dyn CounterStore>>,
    local: LocalWindowStore,
    degraded: AtomicBool,
    fallbacks: AtomicU64,
    aggregator: Arc<MetricsAggregator>,
    events: EventPublisher,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("enabled", &self.enabled)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("shared", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// `shared` is `None` when no shared store is configured or reachable.
    pub fn new(
        config: &RateLimitConfig,
        shared: Option<Arc<dyn CounterStore>>,
        aggregator: Arc<MetricsAggregator>,
        events: EventPublisher,
    ) -> Self {
        if config.enabled && shared.is_none() {
            tracing::warn!("No shared rate limit store, limits apply per instance");
        }
        Self {
            enabled: config.enabled,
            limit: config.max_requests,
            window: config.window(),
            key_prefix: config.key_prefix.clone(),
            shared,
            local: LocalWindowStore::new(),
            degraded: AtomicBool::new(false),
            fallbacks: AtomicU64::new(0),
            aggregator,
            events,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of checks answered from process memory because the shared
    /// store failed.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Count one request from `client` and decide whether it may proceed.
    pub async fn admit(&self, client: &str, path: &str) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision::unlimited();
        }

        let key = format!("{}{}", self.key_prefix, client);
        let window = self.count(&key).await;

        let admission = if window.count > self.limit {
            Admission::Rejected
        } else {
            Admission::Admitted
        };

        if admission == Admission::Rejected {
            self.on_rejected(client, path);
        }

        RateLimitDecision {
            admission,
            enforced: true,
            limit: self.limit,
            remaining: self.limit.saturating_sub(window.count),
            reset_after: window.reset_after,
        }
    }

    async fn count(&self, key: &str) -> WindowCount {
        let Some(shared) = &self.shared else {
            return self.local.incr_at(key, self.window, Instant::now());
        };

        match shared.incr(key, self.window).await {
            Ok(count) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!("Shared rate limit store recovered");
                }
                count
            }
            Err(e) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    tracing::warn!(error = %e, "Shared rate limit store unavailable, using local windows");
                }
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                metrics::record_store_fallback("redis");
                self.local.incr_at(key, self.window, Instant::now())
            }
        }
    }

    fn on_rejected(&self, client: &str, path: &str) {
        tracing::warn!(client = %client, path = %path, limit = self.limit, "Rate limit exceeded");
        metrics::record_rate_limited("window");
        self.aggregator.record_rate_limit_hit();
        self.events.publish(
            "api.rate_limited",
            serde_json::json!({
                "ip": client,
                "path": path,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
            "api-gateway",
        );
    }
}

/// Client key for rate limiting: the peer IP, or the first
/// `X-Forwarded-For` hop when the gateway sits behind a trusted proxy.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.trim_start_matches('[').trim_end_matches(']').to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
