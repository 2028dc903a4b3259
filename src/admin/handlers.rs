//! Policy administration handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::chaos::FaultPolicy;
use crate::http::server::AppState;

/// `GET /admin/policy`
pub async fn get_policy(State(state): State<AppState>) -> Json<FaultPolicy> {
    Json(state.policy.current().as_ref().clone())
}

/// `PUT /admin/policy`: replace the policy until the next sync overwrites it.
pub async fn put_policy(
    State(state): State<AppState>,
    Json(policy): Json<FaultPolicy>,
) -> Json<FaultPolicy> {
    state.policy_sync.push(policy);
    Json(state.policy.current().as_ref().clone())
}

/// `POST /admin/policy/sync`: pull from the chaos service now.
pub async fn sync_policy(State(state): State<AppState>) -> impl IntoResponse {
    match state.policy_sync.sync().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "synced": true, "policy": state.policy.current().as_ref() })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "On-demand policy sync failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "synced": false, "error": e.to_string() })),
            )
        }
    }
}
