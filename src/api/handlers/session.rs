//! Session handlers: who am I, cookie refresh and logout.

use axum::extract::{Extension, OriginalUri, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Duration;
use tracing::{debug, error, info};

use crate::api::error::{internal_error, invalid_token, ApiError};
use crate::api::types::{MeResponse, RefreshResponse};
use crate::auth::{
    cookie_value, AuthError, GatewayContext, RequestMeta, TokenKind, VerifyError,
};
use crate::server::AppState;

/// GET /api/auth/me - The caller as the gateway sees it.
pub async fn me(
    Extension(context): Extension<GatewayContext>,
) -> Result<Json<MeResponse>, ApiError> {
    let permissions = context.permissions().to_vec();
    let identity = context.identity.ok_or(AuthError::MissingCredential)?;

    Ok(Json(MeResponse {
        source: context.source,
        identity,
        effective_roles: context.effective_roles,
        permissions,
    }))
}

/// POST /api/auth/refresh - Reissue both session cookies from the refresh cookie.
pub async fn refresh_session(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let sessions = state.sessions.as_ref().ok_or_else(invalid_token)?;

    let meta = RequestMeta::from_request(&headers, &uri, state.trust_proxy);
    let names = state.cookies.names(&meta);
    let token = cookie_value(&headers, names.refresh).ok_or_else(invalid_token)?;

    let user = sessions
        .decode_kind(&token, TokenKind::Refresh)
        .map_err(|e| {
            debug!(error = %e, source = %meta.source, "refresh token rejected");
            invalid_token()
        })?;

    let access_ttl = state.session.access_ttl_secs;
    let refresh_ttl = state.session.refresh_ttl_secs;
    let issue_failed = |e: VerifyError| {
        error!(error = %e, "failed to issue session token");
        internal_error("Failed to issue session")
    };
    let access = sessions
        .issue_access(&user, Duration::seconds(access_ttl))
        .map_err(issue_failed)?;
    let refresh = sessions
        .issue_refresh(&user, Duration::seconds(refresh_ttl))
        .map_err(issue_failed)?;

    let cookies = state
        .cookies
        .session_cookies(&meta, (&access, access_ttl), (&refresh, refresh_ttl));

    info!(user_id = %user.user_id, source = %meta.source, "session refreshed");

    let mut response = Json(RefreshResponse {
        user_id: user.user_id,
        username: user.username,
        source: meta.source,
        expires_in: access_ttl,
    })
    .into_response();
    append_cookies(response.headers_mut(), &cookies)?;
    Ok(response)
}

/// POST /api/auth/logout - Clear the caller's source-scoped session cookies.
pub async fn logout(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let meta = RequestMeta::from_request(&headers, &uri, state.trust_proxy);
    let cookies = state.cookies.clear_session_cookies(&meta);

    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookies(response.headers_mut(), &cookies)?;
    Ok(response)
}

fn append_cookies(headers: &mut HeaderMap, cookies: &[String]) -> Result<(), ApiError> {
    for cookie in cookies {
        let value = HeaderValue::from_str(cookie).map_err(|e| {
            error!(error = %e, "invalid Set-Cookie value");
            internal_error("Failed to build session cookie")
        })?;
        headers.append(SET_COOKIE, value);
    }
    Ok(())
}
