//! Request security gateway for the navigation backend
//!
//! Every inbound API call passes through this module before it reaches a
//! handler. It unifies two credential types and two front-ends that share one
//! backend.
//!
//! # Authentication Methods
//!
//! - **Session tokens**: HS256 JWTs carried as `Authorization: Bearer` or in the
//!   source-scoped `access_token_<source>` cookie
//! - **Client secrets**: service-to-service shared secrets sent in
//!   `x-client-secret` (header name configurable), SHA-256 hashed at rest
//!
//! # Request Sources
//!
//! The `X-App-Source` header declares which front-end made the call
//! (`main` or `admin`). It changes role normalization and cookie naming.
//!
//! # Rate Limiting
//!
//! Fixed-window counters keyed by caller identity (or IP) and route pattern:
//! - Per user-type defaults (`anonymous`, `authenticated`, `admin`)
//! - Stricter per-route entries for authentication endpoints
//! - IP allow/deny lists and exempt paths

mod access;
mod client_secret;
mod cookies;
mod credentials;
mod jwt;
mod middleware;
mod rate_limit;
mod rbac;

pub use access::*;
pub use client_secret::*;
pub use cookies::*;
pub use credentials::*;
pub use jwt::*;
pub use middleware::*;
pub use rate_limit::*;
pub use rbac::*;

use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;

/// Header declaring the originating front-end
pub const APP_SOURCE_HEADER: &str = "x-app-source";

/// Which front-end originated a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    /// Public navigation site
    #[default]
    Main,
    /// Administrative panel
    Admin,
}

impl RequestSource {
    /// Resolve the source from `X-App-Source`; anything but `admin` is `main`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(APP_SOURCE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Self::parse)
            .unwrap_or_default()
    }

    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::Main
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for RequestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user authenticated by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub username: String,
    /// Role slugs as issued, before source normalization
    pub raw_roles: Vec<String>,
    pub raw_groups: Vec<String>,
    pub permissions: Vec<String>,
}

/// A registered application authenticated by its client secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationIdentity {
    pub app_id: String,
    pub app_name: String,
}

/// Authenticated caller
///
/// Downstream code has to handle both shapes; an application never carries
/// user fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "auth_type", rename_all = "snake_case")]
pub enum Identity {
    #[serde(rename = "session")]
    User(UserIdentity),
    #[serde(rename = "client_secret")]
    Application(ApplicationIdentity),
}

impl Identity {
    /// Raw role slugs; applications have none
    pub fn raw_roles(&self) -> &[String] {
        match self {
            Identity::User(user) => &user.raw_roles,
            Identity::Application(_) => &[],
        }
    }

    pub fn permissions(&self) -> &[String] {
        match self {
            Identity::User(user) => &user.permissions,
            Identity::Application(_) => &[],
        }
    }

    /// Identity component of the rate-limit bucket key
    pub fn bucket_key(&self) -> String {
        match self {
            Identity::User(user) => format!("user:{}", user.user_id),
            Identity::Application(app) => format!("app:{}", app.app_id),
        }
    }

    pub fn as_user(&self) -> Option<&UserIdentity> {
        match self {
            Identity::User(user) => Some(user),
            Identity::Application(_) => None,
        }
    }
}

/// Gateway failure kinds
///
/// All variants are terminal for the gateway pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingCredential,

    /// Presented to the caller exactly like `MissingCredential`
    #[error("invalid credential")]
    InvalidCredential,

    #[error("client secret required")]
    MissingClientSecret,

    #[error("invalid client secret")]
    InvalidClientSecret,

    #[error("credential verification failed")]
    VerificationFailed,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("insufficient permissions")]
    Forbidden,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredential
            | AuthError::InvalidCredential
            | AuthError::MissingClientSecret
            | AuthError::InvalidClientSecret => StatusCode::UNAUTHORIZED,
            AuthError::VerificationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    /// Caller-facing message
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::MissingCredential | AuthError::InvalidCredential => {
                "Authentication required"
            }
            AuthError::MissingClientSecret => "Client secret required",
            AuthError::InvalidClientSecret => "Invalid client secret",
            AuthError::VerificationFailed => "Credential verification failed",
            AuthError::RateLimited { .. } => "Too many requests, please try again later",
            AuthError::Forbidden => "Insufficient permissions",
        }
    }
}
