//! Admin control surface, enabled by `admin.enabled`.
//!
//! Every route requires `Authorization: Bearer {admin.api_key}`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::{get_policy, put_policy, sync_policy};
use crate::http::server::AppState;

pub fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/policy", get(get_policy).put(put_policy))
        .route("/admin/policy/sync", post(sync_policy))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
