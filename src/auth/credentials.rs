//! Credential extraction
//!
//! Turns request headers and cookies into a single [`Credential`].

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::{HeaderMap, HeaderName};

use super::{CookieNames, RequestSource};

/// Default header carrying the service-to-service secret
pub const DEFAULT_CLIENT_SECRET_HEADER: &str = "x-client-secret";

/// Normalized inbound credential
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    ClientSecret(String),
    None,
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Bearer(_) => "bearer",
            Credential::ClientSecret(_) => "client_secret",
            Credential::None => "none",
        }
    }
}

// Values are never printed.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::None => f.write_str("Credential::None"),
            other => write!(f, "Credential::{}(<redacted>)", other.kind()),
        }
    }
}

/// Extract the credential for a request.
///
/// A client secret wins over any bearer token that happens to be forwarded
/// with it. The source-scoped access cookie is only consulted when there is
/// no `Authorization` bearer token.
pub fn extract_credential(
    headers: &HeaderMap,
    secret_header: &HeaderName,
    source: RequestSource,
) -> Credential {
    if let Some(secret) = header_value(headers, secret_header) {
        return Credential::ClientSecret(secret.to_string());
    }

    if let Some(token) = bearer_token(headers) {
        return Credential::Bearer(token.to_string());
    }

    let names = CookieNames::for_source(source);
    if let Some(token) = cookie_value(headers, names.access) {
        return Credential::Bearer(token);
    }

    Credential::None
}

/// Non-empty, trimmed header value
pub fn header_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = header_value(headers, &AUTHORIZATION)?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Split a `Cookie` header into name/value pairs.
pub fn parse_cookie_header(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.split(';').filter_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name, value.trim().trim_matches('"')))
    })
}

/// Value of the named cookie across all `Cookie` headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(parse_cookie_header)
        .find(|(n, v)| *n == name && !v.is_empty())
        .map(|(_, v)| v.to_string())
}
