//! Synthetic JSON responses produced by the gateway itself.
//!
//! Injected faults must look like real failures of the same class, so they
//! use plain status codes and small JSON bodies like everything else here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// An injected error with one of the chaos status codes.
pub fn chaos_error(code: u16) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": "Chaos Injected Error", "code": code }))).into_response()
}

/// Answer for a request whose injected timeout watchdog fired.
pub fn chaos_timeout() -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(json!({ "error": "Gateway Timeout - Chaos Injected" })),
    )
        .into_response()
}

/// Answer for a request that outlived the gateway's overall deadline.
pub fn request_timeout() -> Response {
    (StatusCode::REQUEST_TIMEOUT, Json(json!({ "error": "Request Timeout" }))).into_response()
}

pub fn rate_limited() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests",
            "message": "Please try again later"
        })),
    )
        .into_response()
}

pub fn unknown_service() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Unknown service" }))).into_response()
}

pub fn bad_gateway(message: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": "Bad Gateway", "message": message.to_string() })),
    )
        .into_response()
}

pub fn gateway_timeout(message: impl std::fmt::Display) -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(json!({ "error": "Gateway Timeout", "message": message.to_string() })),
    )
        .into_response()
}

pub fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chaos_error_keeps_code() {
        let response = chaos_error(502);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Chaos Injected Error", "code": 502 })
        );
    }

    #[tokio::test]
    async fn test_rate_limited_body() {
        let response = rate_limited();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["error"], "Too many requests");
    }

    #[tokio::test]
    async fn test_request_timeout_body() {
        let response = request_timeout();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body_json(response).await["error"], "Request Timeout");
    }

    #[tokio::test]
    async fn test_chaos_timeout_body() {
        let response = chaos_timeout();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            body_json(response).await["error"],
            "Gateway Timeout - Chaos Injected"
        );
    }
}
