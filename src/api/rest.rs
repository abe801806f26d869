//! REST routes served behind the gateway.

use axum::routing::{get, post};
use axum::Router;

use crate::api::error::{not_found, ApiError};
use crate::api::handlers::{logout, me, refresh_session, reset_rate_limits};
use crate::server::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Session
        .route("/auth/me", get(me))
        .route("/auth/refresh", post(refresh_session))
        .route("/auth/logout", post(logout))
        // Gateway administration
        .route("/admin/rate-limits/reset", post(reset_rate_limits))
        // Unknown API paths still pass through the gateway
        .fallback(api_not_found)
}

async fn api_not_found() -> ApiError {
    not_found("No such endpoint")
}
