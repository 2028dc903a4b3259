//! Forwarding to downstream services.
//!
//! # Responsibilities
//! - Rewrite `/api/{service}/{rest}` onto the service's base URL
//! - Copy method, headers, query and body; relay the answer unchanged
//! - Time every downstream call per service
//!
//! A downstream 4xx/5xx is relayed as is. Only transport failures become
//! gateway-generated 502/504 answers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Request, Uri, Version},
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::config::TimeoutConfig;
use crate::http::response;
use crate::observability::{metrics, MetricsAggregator};
use crate::routing::{service_label, ServiceRegistry};

pub type HttpClient = Client<HttpConnector, Body>;

/// Hop-by-hop headers never forwarded to a downstream service. `host` is
/// rewritten by the client from the target URI.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "host",
    "keep-alive",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("invalid upstream URI: {0}")]
    InvalidUri(#[from] axum::http::uri::InvalidUri),

    #[error("could not build upstream request: {0}")]
    Build(#[from] axum::http::Error),

    #[error("{service} request failed: {source}")]
    Request {
        service: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("{service} did not answer within {after:?}")]
    Timeout { service: String, after: Duration },
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        match self {
            UpstreamError::UnknownService(_) => response::unknown_service(),
            UpstreamError::Timeout { .. } => response::gateway_timeout(&self),
            _ => response::bad_gateway(&self),
        }
    }
}

#[derive(Clone)]
pub struct Upstream {
    client: HttpClient,
    registry: Arc<ServiceRegistry>,
    aggregator: Arc<MetricsAggregator>,
    timeout: Duration,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Upstream {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        aggregator: Arc<MetricsAggregator>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            registry,
            aggregator,
            timeout: Duration::from_secs(timeouts.upstream_secs),
        }
    }

    /// Forward `request` to the service named by its path.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response, UpstreamError> {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();
        let service = service_label(path).to_string();

        let target = self
            .registry
            .upstream_uri(path, parts.uri.query())
            .ok_or_else(|| UpstreamError::UnknownService(service.clone()))?;
        let uri: Uri = target.parse()?;

        let mut builder = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .version(Version::HTTP_11);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in parts.headers.iter() {
                if !HOP_BY_HOP.contains(&name.as_str()) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
        let outbound = builder.body(body)?;

        tracing::debug!(service = %service, method = %parts.method, uri = %target, "Forwarding request");

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.client.request(outbound)).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(upstream)) => {
                let status = upstream.status().as_u16();
                metrics::record_upstream(&service, Some(status), elapsed);
                self.aggregator.record_downstream_latency(&service, elapsed);
                let (parts, body) = upstream.into_parts();
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Ok(Err(source)) => {
                metrics::record_upstream(&service, None, elapsed);
                tracing::error!(service = %service, error = %source, "Upstream request failed");
                Err(UpstreamError::Request { service, source })
            }
            Err(_) => {
                metrics::record_upstream(&service, None, elapsed);
                tracing::error!(service = %service, timeout_secs = self.timeout.as_secs(), "Upstream request timed out");
                Err(UpstreamError::Timeout {
                    service,
                    after: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServicesConfig;
    use axum::http::StatusCode;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upstream(services: &[(&str, &str)]) -> (Upstream, Arc<MetricsAggregator>) {
        let map: BTreeMap<String, String> = services
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let aggregator = Arc::new(MetricsAggregator::new());
        let upstream = Upstream::new(
            Arc::new(ServiceRegistry::new(&ServicesConfig(map))),
            aggregator.clone(),
            &TimeoutConfig::default(),
        );
        (upstream, aggregator)
    }

    #[tokio::test]
    async fn test_forward_rewrites_path_and_relays() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/7"))
            .and(query_param("fields", "name"))
            .and(header_is("x-request-id", "abc"))
            .respond_with(ResponseTemplate::new(418).set_body_string("teapot"))
            .mount(&server)
            .await;

        let (upstream, aggregator) = upstream(&[("products", &server.uri())]);
        let request = Request::builder()
            .uri("/api/products/7?fields=name")
            .header("x-request-id", "abc")
            .body(Body::empty())
            .unwrap();

        let response = upstream.forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"teapot");

        let downstream = aggregator.snapshot().downstream;
        assert_eq!(downstream.len(), 1);
        assert_eq!(downstream[0].service, "products");
    }

    #[tokio::test]
    async fn test_forward_passes_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(|req: &wiremock::Request| {
                ResponseTemplate::new(201).set_body_bytes(req.body.clone())
            })
            .mount(&server)
            .await;

        let (upstream, _) = upstream(&[("orders", &server.uri())]);
        let request = Request::builder()
            .method("POST")
            .uri("/api/orders")
            .body(Body::from(r#"{"sku":"x"}"#))
            .unwrap();

        let response = upstream.forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"sku":"x"}"#);
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let (upstream, _) = upstream(&[]);
        let request = Request::builder().uri("/api/nope/1").body(Body::empty()).unwrap();
        let err = upstream.forward(request).await.unwrap_err();
        assert!(matches!(err, UpstreamError::UnknownService(ref s) if s == "nope"));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_bad_gateway() {
        // Nothing listens on port 9 locally.
        let (upstream, _) = upstream(&[("users", "http://127.0.0.1:9")]);
        let request = Request::builder().uri("/api/users/1").body(Body::empty()).unwrap();
        let err = upstream.forward(request).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Request { .. }));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
