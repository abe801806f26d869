//! Gateway middleware for Axum
//!
//! Runs the whole security pass once per request and hands downstream
//! handlers a [`GatewayContext`].

use axum::{
    body::Body,
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue, Method, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    compute_effective_roles, extract_credential, AccessPolicy, AuthError, ClientSecretGuard,
    Credential, EffectiveRoles, Identity, RateLimitOutcome, RateLimitRequest, RateLimitStatus,
    RateLimiter, RequestSource, SessionVerifier, UserIdentity, VerifyError,
};
use crate::api::error::ApiError;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Enriched request context for downstream handlers
#[derive(Debug, Clone, Serialize)]
pub struct GatewayContext {
    pub source: RequestSource,
    pub identity: Option<Identity>,
    pub effective_roles: EffectiveRoles,
    pub client_ip: String,
    #[serde(skip)]
    pub rate_limit: Option<RateLimitStatus>,
}

impl GatewayContext {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn user(&self) -> Option<&UserIdentity> {
        self.identity.as_ref().and_then(Identity::as_user)
    }

    pub fn permissions(&self) -> &[String] {
        self.identity
            .as_ref()
            .map(Identity::permissions)
            .unwrap_or_default()
    }
}

/// Request attributes the gateway reads
#[derive(Debug, Clone, Copy)]
pub struct GatewayRequest<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub peer_ip: Option<IpAddr>,
}

impl<'a> GatewayRequest<'a> {
    /// The URI is the one the client sent; routers nested under `/api` only
    /// see the stripped remainder in `parts.uri`.
    pub fn from_parts(parts: &'a Parts) -> Self {
        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map(|OriginalUri(uri)| uri)
            .unwrap_or(&parts.uri);
        let peer_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Self {
            method: &parts.method,
            uri,
            headers: &parts.headers,
            peer_ip,
        }
    }

    /// Path plus query, as the client sent it
    fn url(&self) -> &'a str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }
}

/// A failed gateway pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRejection {
    pub error: AuthError,
    /// Set once the limiter has counted the request
    pub rate_limit: Option<RateLimitStatus>,
}

impl From<AuthError> for GatewayRejection {
    fn from(error: AuthError) -> Self {
        Self {
            error,
            rate_limit: None,
        }
    }
}

impl IntoResponse for GatewayRejection {
    fn into_response(self) -> Response {
        let mut response = ApiError::from(self.error).into_response();
        if let Some(status) = &self.rate_limit {
            apply_rate_limit_headers(response.headers_mut(), status);
        }
        response
    }
}

/// Composed security pass
pub struct Gateway {
    guard: ClientSecretGuard,
    verifier: Option<Arc<dyn SessionVerifier>>,
    rate_limiter: Arc<RateLimiter>,
    access: AccessPolicy,
    trust_proxy: bool,
}

impl Gateway {
    pub fn new(
        guard: ClientSecretGuard,
        rate_limiter: Arc<RateLimiter>,
        access: AccessPolicy,
    ) -> Self {
        Self {
            guard,
            verifier: None,
            rate_limiter,
            access,
            trust_proxy: false,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SessionVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Trust `X-Forwarded-For` for the client IP
    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn client_secret_header(&self) -> &HeaderName {
        self.guard.header()
    }

    /// Run the security pass for one request.
    pub async fn evaluate(
        &self,
        request: &GatewayRequest<'_>,
    ) -> Result<GatewayContext, GatewayRejection> {
        let source = RequestSource::from_headers(request.headers);
        let path = request.uri.path();
        let client_ip = client_ip(request.headers, request.peer_ip, self.trust_proxy);

        let pass = self.guard.check(request.url(), request.headers).await?;

        let credential = extract_credential(request.headers, self.guard.header(), source);
        let mut credential_rejected = false;
        let identity = match credential {
            Credential::ClientSecret(secret) => {
                // A presented secret is always validated, even when the guard
                // let the request through without looking at it.
                let app = match pass.app {
                    Some(app) => app,
                    None => self.guard.authenticate(&secret).await?,
                };
                Some(Identity::Application(app))
            }
            Credential::Bearer(token) => match self.verify_session(&token).await? {
                Some(user) => Some(Identity::User(user)),
                None => {
                    credential_rejected = true;
                    None
                }
            },
            Credential::None => None,
        };

        let effective_roles = identity
            .as_ref()
            .map(|identity| compute_effective_roles(identity.raw_roles(), source))
            .unwrap_or_default();

        let outcome = self.rate_limiter.check(&RateLimitRequest {
            method: request.method.as_str(),
            path,
            ip: &client_ip,
            identity: identity.as_ref(),
            roles: &effective_roles,
        });
        let rate_limit = match outcome {
            RateLimitOutcome::Bypassed => None,
            RateLimitOutcome::Denied => {
                return Err(AuthError::RateLimited {
                    retry_after_secs: None,
                }
                .into())
            }
            RateLimitOutcome::Counted(status) if !status.allowed => {
                return Err(GatewayRejection {
                    error: AuthError::RateLimited {
                        retry_after_secs: status.retry_after_secs,
                    },
                    rate_limit: Some(status),
                });
            }
            RateLimitOutcome::Counted(status) => Some(status),
        };

        if let Err(error) =
            self.access
                .enforce(path, identity.as_ref(), &effective_roles, credential_rejected)
        {
            return Err(GatewayRejection { error, rate_limit });
        }

        Ok(GatewayContext {
            source,
            identity,
            effective_roles,
            client_ip,
            rate_limit,
        })
    }

    /// `Ok(None)` for a token that does not verify.
    async fn verify_session(&self, token: &str) -> Result<Option<UserIdentity>, AuthError> {
        let Some(verifier) = &self.verifier else {
            debug!("bearer token presented but no session verifier configured");
            return Ok(None);
        };

        match AssertUnwindSafe(async { verifier.verify(token).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(user)) => Ok(Some(user)),
            Ok(Err(VerifyError::Invalid)) => Ok(None),
            Ok(Err(e)) => {
                error!(error = %e, "session verification failed");
                Err(AuthError::VerificationFailed)
            }
            Err(_) => {
                error!("session verifier panicked");
                Err(AuthError::VerificationFailed)
            }
        }
    }
}

/// Client IP: first `X-Forwarded-For` hop behind a trusted proxy, else the
/// socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Attach `X-RateLimit-*` headers, plus `Retry-After` when blocked.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_epoch_secs));
    if let Some(seconds) = status.retry_after_secs {
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(seconds));
    }
}

/// Gateway middleware
pub async fn gateway_middleware(
    State(gateway): State<Arc<Gateway>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let request = GatewayRequest::from_parts(&parts);
    let evaluated = gateway.evaluate(&request).await;
    let context = match evaluated {
        Ok(context) => context,
        Err(rejection) => {
            info!(
                method = %parts.method,
                path = request.uri.path(),
                error = %rejection.error,
                "request rejected by gateway"
            );
            return rejection.into_response();
        }
    };

    let rate_limit = context.rate_limit.clone();
    parts.extensions.insert(context);

    let mut response = next.run(Request::from_parts(parts, body)).await;
    if let Some(status) = &rate_limit {
        apply_rate_limit_headers(response.headers_mut(), status);
    }
    response
}
