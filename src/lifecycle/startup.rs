//! Startup orchestration.
//!
//! Builds every shared component once, in dependency order:
//! metrics → aggregator → events → policy → injector → rate limiter →
//! upstream. Only a broken configuration is fatal here. An unreachable Redis
//! or chaos service degrades the gateway instead of stopping it.

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::chaos::{FastRandom, FaultInjector, HttpPolicySource, PolicyHandle, PolicySync, SyncError};
use crate::config::GatewayConfig;
use crate::events::{EventPublisher, HttpEventSink, PublishError};
use crate::http::pipeline::RequestPipeline;
use crate::http::upstream::Upstream;
use crate::lifecycle::Shutdown;
use crate::observability::{metrics, MetricsAggregator};
use crate::routing::ServiceRegistry;
use crate::security::{CounterStore, RateLimiter, RedisCounterStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("policy source: {0}")]
    PolicySource(#[from] SyncError),

    #[error("event sink: {0}")]
    EventSink(#[from] PublishError),
}

/// Everything the HTTP server needs, wired together.
pub struct GatewayParts {
    pub aggregator: Arc<MetricsAggregator>,
    pub policy: Arc<PolicyHandle>,
    pub policy_sync: Arc<PolicySync>,
    pub pipeline: RequestPipeline,
    pub upstream: Upstream,
    pub events: EventPublisher,
    pub prometheus: Option<PrometheusHandle>,
    /// Background tasks started during assembly (the event drain loop).
    pub background: Vec<JoinHandle<()>>,
}

/// Install the Prometheus recorder when metrics are enabled.
pub fn install_metrics(config: &GatewayConfig) -> Option<PrometheusHandle> {
    if !config.observability.metrics_enabled {
        return None;
    }
    match metrics::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build Prometheus recorder, /metrics disabled");
            None
        }
    }
}

pub async fn assemble(
    config: &GatewayConfig,
    shutdown: &Shutdown,
    prometheus: Option<PrometheusHandle>,
) -> Result<GatewayParts, StartupError> {
    let aggregator = Arc::new(MetricsAggregator::new());
    let mut background = Vec::new();

    let events = if config.events.enabled {
        let sink = HttpEventSink::new(&config.events.service_url, config.events.timeout())?;
        let (publisher, drain) =
            EventPublisher::spawn(Arc::new(sink), config.events.queue_capacity, shutdown.subscribe());
        background.push(drain);
        publisher
    } else {
        tracing::info!("Event publishing disabled");
        EventPublisher::disabled()
    };

    let policy = Arc::new(PolicyHandle::default());
    let source = HttpPolicySource::new(&config.chaos.service_url, config.chaos.request_timeout())?;
    let policy_sync = Arc::new(PolicySync::new(Arc::new(source), policy.clone(), &config.chaos));

    let injector = Arc::new(FaultInjector::new(
        policy.clone(),
        Arc::new(FastRandom),
        events.clone(),
    ));

    let shared = connect_counter_store(config).await;
    let limiter = Arc::new(RateLimiter::new(
        &config.rate_limit,
        shared,
        aggregator.clone(),
        events.clone(),
    ));

    let pipeline = RequestPipeline::new(
        injector,
        limiter,
        aggregator.clone(),
        config.rate_limit.trust_forwarded_for,
        Duration::from_secs(config.timeouts.request_secs),
    );

    let registry = Arc::new(ServiceRegistry::new(&config.services));
    let upstream = Upstream::new(registry, aggregator.clone(), &config.timeouts);

    tracing::info!(
        services = config.services.0.len(),
        rate_limit = config.rate_limit.enabled,
        events = events.is_enabled(),
        "Gateway components assembled"
    );

    Ok(GatewayParts {
        aggregator,
        policy,
        policy_sync,
        pipeline,
        upstream,
        events,
        prometheus,
        background,
    })
}

async fn connect_counter_store(config: &GatewayConfig) -> Option<Arc<dyn CounterStore>> {
    let rate_limit = &config.rate_limit;
    if !rate_limit.enabled || rate_limit.redis_url.is_empty() {
        return None;
    }

    match RedisCounterStore::connect(&rate_limit.redis_url, rate_limit.store_timeout()).await {
        Ok(store) => {
            tracing::info!(url = %rate_limit.redis_url, "Connected to rate limit store");
            Some(Arc::new(store))
        }
        Err(e) => {
            tracing::warn!(url = %rate_limit.redis_url, error = %e, "Rate limit store unreachable, falling back to local windows");
            None
        }
    }
}
