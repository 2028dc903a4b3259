//! Event destinations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One entry of the event trail, in the sink's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub chaos_type: String,
    pub details: serde_json::Value,
    pub service: String,
    /// RFC 3339.
    pub timestamp: String,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event sink request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("event sink answered {0}")]
    Status(u16),
}

/// Somewhere events can be delivered to.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &GatewayEvent) -> Result<(), PublishError>;
}

/// Posts events to `{base}/chaos/event-publish`.
#[derive(Debug, Clone)]
pub struct HttpEventSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEventSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chaos/event-publish", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn send(&self, event: &GatewayEvent) -> Result<(), PublishError> {
        let response = self.client.post(&self.endpoint).json(event).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample() -> GatewayEvent {
        GatewayEvent {
            chaos_type: "error".into(),
            details: "HTTP 503".into(),
            service: "products".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn test_posts_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chaos/event-publish"))
            .and(body_partial_json(serde_json::json!({
                "chaos_type": "error",
                "details": "HTTP 503",
                "service": "products",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpEventSink::new(&server.uri(), Duration::from_secs(1)).unwrap();
        sink.send(&sample()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = HttpEventSink::new(&server.uri(), Duration::from_secs(1)).unwrap();
        let err = sink.send(&sample()).await.unwrap_err();
        assert!(matches!(err, PublishError::Status(500)));
    }
}
