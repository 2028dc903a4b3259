//! Pulls the fault policy from the chaos service.
//!
//! # Responsibilities
//! - Fetch `GET {base}/chaos/config` once at startup and every interval
//! - Retry failed fetches with exponential backoff
//! - Publish successful fetches into the shared [`PolicyHandle`]
//!
//! A fetch that never succeeds leaves the previous policy in force. Nothing
//! here is on the request path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::chaos::policy::{FaultPolicy, PolicyHandle};
use crate::config::ChaosConfig;
use crate::observability::metrics;
use crate::resilience::calculate_backoff;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("policy request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("policy request timed out")]
    Timeout,

    #[error("policy service answered {0}")]
    Status(u16),

    #[error("policy body could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("policy sync gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<SyncError>,
    },
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else {
            SyncError::Request(e)
        }
    }
}

/// Where policies come from.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch(&self) -> Result<FaultPolicy, SyncError>;
}

/// Policy fields as the chaos service sends them. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePolicy {
    enabled: Option<bool>,
    error_rate: f64,
    timeout_rate: f64,
    latency_min_ms: u64,
    latency_max_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ConfigEnvelope {
    #[serde(default)]
    config: WirePolicy,
    /// The chaos service reports the switch next to `config`, not inside it.
    #[serde(default)]
    enabled: Option<bool>,
}

impl ConfigEnvelope {
    fn into_policy(self) -> FaultPolicy {
        FaultPolicy {
            enabled: self.config.enabled.or(self.enabled).unwrap_or(false),
            error_rate: self.config.error_rate,
            timeout_rate: self.config.timeout_rate,
            latency_min_ms: self.config.latency_min_ms,
            latency_max_ms: self.config.latency_max_ms,
        }
    }
}

/// Decode a `/chaos/config` response body.
pub fn parse_policy(body: &[u8]) -> Result<FaultPolicy, SyncError> {
    let envelope: ConfigEnvelope = serde_json::from_slice(body)?;
    Ok(envelope.into_policy())
}

/// Reads the policy from the chaos service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPolicySource {
    client: reqwest::Client,
    url: String,
}

impl HttpPolicySource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/chaos/config", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl PolicySource for HttpPolicySource {
    async fn fetch(&self) -> Result<FaultPolicy, SyncError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        parse_policy(&body)
    }
}

/// Keeps the shared policy in step with the policy source.
pub struct PolicySync {
    source: Arc<dyn PolicySource>,
    handle: Arc<PolicyHandle>,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    interval: Duration,
}

impl std::fmt::Debug for PolicySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySync")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl PolicySync {
    pub fn new(source: Arc<dyn PolicySource>, handle: Arc<PolicyHandle>, config: &ChaosConfig) -> Self {
        Self {
            source,
            handle,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            interval: config.sync_interval(),
        }
    }

    pub fn handle(&self) -> &Arc<PolicyHandle> {
        &self.handle
    }

    /// Fetch and install the policy, retrying with backoff.
    ///
    /// On exhaustion the current policy is left untouched.
    pub async fn sync(&self) -> Result<(), SyncError> {
        let mut attempt = 1;
        loop {
            match self.source.fetch().await {
                Ok(policy) => {
                    self.handle.replace(policy);
                    metrics::record_policy_sync("success");
                    if attempt > 1 {
                        tracing::info!(attempt, "Fault policy synced after retries");
                    }
                    return Ok(());
                }
                Err(e) if attempt >= self.max_attempts => {
                    metrics::record_policy_sync("exhausted");
                    return Err(SyncError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let wait = calculate_backoff(attempt, self.backoff_base, self.backoff_max);
                    tracing::debug!(attempt, error = %e, wait_ms = wait.as_millis() as u64, "Policy fetch failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Install a policy directly, bypassing the source.
    pub fn push(&self, policy: FaultPolicy) {
        tracing::info!(enabled = policy.enabled, "Fault policy pushed");
        self.handle.replace(policy);
    }

    /// Sync now, then once per interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "Policy sync started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Policy sync stopping");
                    return;
                }
                _ = ticker.tick() => {
                    // A shutdown during a long retry chain cancels the chain.
                    tokio::select! {
                        _ = shutdown.recv() => {
                            tracing::info!("Policy sync stopping");
                            return;
                        }
                        result = self.sync() => {
                            if let Err(e) = result {
                                tracing::warn!(error = %e, "Policy sync failed, keeping current policy");
                            }
                        }
                    }
                }
            }
        }
    }
}
