//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the axum router: proxy routes, health, metrics, admin
//! - Wrap proxy routes in the request pipeline
//! - Wire middleware (tracing, request ID, body limit, timeout on local routes)
//! - Run the policy sync loop for the server's lifetime
//! - Serve until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::chaos::{PolicyHandle, PolicySync};
use crate::config::GatewayConfig;
use crate::http::pipeline::{pipeline_middleware, RequestPipeline};
use crate::http::upstream::Upstream;
use crate::lifecycle::{GatewayParts, Shutdown};
use crate::observability::MetricsAggregator;

pub const SERVICE_NAME: &str = "api-gateway";

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<MetricsAggregator>,
    pub policy: Arc<PolicyHandle>,
    pub policy_sync: Arc<PolicySync>,
    pub upstream: Upstream,
    pub prometheus: Option<PrometheusHandle>,
    pub admin_key: Arc<str>,
    pub top_routes: usize,
}

/// The gateway's HTTP front end.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    policy_sync: Arc<PolicySync>,
    background: Vec<JoinHandle<()>>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, parts: GatewayParts) -> Self {
        let state = AppState {
            aggregator: parts.aggregator,
            policy: parts.policy,
            policy_sync: parts.policy_sync.clone(),
            upstream: parts.upstream,
            prometheus: parts.prometheus,
            admin_key: Arc::from(config.admin.api_key.as_str()),
            top_routes: config.observability.top_routes,
        };

        let router = Self::build_router(&config, state, parts.pipeline);
        Self {
            router,
            config,
            policy_sync: parts.policy_sync,
            background: parts.background,
        }
    }

    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState, pipeline: RequestPipeline) -> Router {
        let api = Router::new()
            .route("/api/{service}", any(proxy_handler))
            .route("/api/{service}/{*rest}", any(proxy_handler))
            .route_layer(middleware::from_fn_with_state(pipeline, pipeline_middleware));

        let mut local = Router::new()
            .route("/health", get(health))
            .route("/metrics", get(prometheus_metrics))
            .route("/metrics/summary", get(metrics_summary));

        if config.admin.enabled {
            local = local.merge(admin::admin_router(state.clone()));
        }

        // Proxy routes enforce the request deadline inside the pipeline so
        // that a timed-out request is still recorded.
        local
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .merge(api)
            .with_state(state)
            .layer(DefaultBodyLimit::max(config.listener.max_body_bytes))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for driving the gateway without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sync_task = if self.config.chaos.sync_enabled {
            Some(tokio::spawn(self.policy_sync.clone().run(shutdown.subscribe())))
        } else {
            tracing::info!("Policy sync disabled, policy changes only via admin push");
            None
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let stop = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.wait().await })
            .await?;

        // The server may also stop on its own; make sure background tasks follow.
        shutdown.trigger();
        if let Some(task) = sync_task {
            let _ = task.await;
        }
        for task in self.background {
            let _ = task.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    match state.upstream.forward(request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Metrics disabled" })),
        )
            .into_response(),
    }
}

async fn metrics_summary(State(state): State<AppState>) -> Response {
    Json(state.aggregator.summary(state.top_routes)).into_response()
}
