//! Gateway administration handlers.

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::Json;
use tracing::info;

use crate::api::error::{bad_request, ApiError};
use crate::api::types::{ResetRateLimitsRequest, ResetRateLimitsResponse};
use crate::auth::{ensure_role, AuthError, GatewayContext, Role};
use crate::server::AppState;

/// POST /api/admin/rate-limits/reset - Clear one bucket or all of them.
///
/// Requires an effective `admin` or `sysadmin` role, whatever the access
/// policy says about the route.
pub async fn reset_rate_limits(
    State(state): State<AppState>,
    Extension(context): Extension<GatewayContext>,
    body: Bytes,
) -> Result<Json<ResetRateLimitsResponse>, ApiError> {
    let actor = context
        .identity
        .as_ref()
        .map(|identity| identity.bucket_key())
        .ok_or(AuthError::MissingCredential)?;
    ensure_role(&context.effective_roles, &[Role::Admin, Role::Sysadmin])?;

    // An empty body resets everything; a malformed one must not
    let request: ResetRateLimitsRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ResetRateLimitsRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| bad_request(format!("Invalid request body: {e}")))?
    };
    let limiter = state.gateway.rate_limiter();

    let cleared = match request.key.as_deref() {
        Some(key) => usize::from(limiter.reset_key(key)),
        None => limiter.reset_all(),
    };

    info!(
        actor = %actor,
        key = request.key.as_deref().unwrap_or("*"),
        cleared,
        "rate limit buckets reset"
    );

    Ok(Json(ResetRateLimitsResponse {
        cleared,
        key: request.key,
    }))
}
