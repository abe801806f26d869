//! Shared request and response types for REST API handlers.

use serde::{Deserialize, Serialize};

use crate::auth::{EffectiveRoles, Identity, RequestSource};

// ============================================================================
// Session types
// ============================================================================

/// Response for `GET /api/auth/me`.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub source: RequestSource,
    pub identity: Identity,
    pub effective_roles: EffectiveRoles,
    pub permissions: Vec<String>,
}

/// Response for `POST /api/auth/refresh`.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub user_id: String,
    pub username: String,
    pub source: RequestSource,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

// ============================================================================
// Admin types
// ============================================================================

/// Request body for `POST /api/admin/rate-limits/reset`.
#[derive(Debug, Default, Deserialize)]
pub struct ResetRateLimitsRequest {
    /// Bucket key to clear; all buckets when absent
    #[serde(default)]
    pub key: Option<String>,
}

/// Response for `POST /api/admin/rate-limits/reset`.
#[derive(Debug, Serialize)]
pub struct ResetRateLimitsResponse {
    pub cleared: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}
