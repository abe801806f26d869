//! Client-secret authentication for service-to-service calls
//!
//! Registered applications send a shared secret in `x-client-secret` (or a
//! configured alternate header). Secrets are formatted as `cs_<random>` and
//! only their SHA-256 hash is kept.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};
use futures_util::FutureExt;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use super::{header_value, ApplicationIdentity, AuthError};

/// Client secret prefix
pub const CLIENT_SECRET_PREFIX: &str = "cs_";

/// Invalid route template or path pattern
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern must start with '/': {0:?}")]
    NotAbsolute(String),

    #[error("pattern has an unnamed parameter segment: {0:?}")]
    EmptyParameter(String),

    #[error("'*' is only allowed as a trailing '/*' segment: {0:?}")]
    MisplacedWildcard(String),

    #[error("pattern must not contain a query string: {0:?}")]
    QueryString(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

/// Bypass route template such as `/api/groups/:id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        let template = template.trim();
        if !template.starts_with('/') {
            return Err(PatternError::NotAbsolute(template.to_string()));
        }
        if template.contains('?') {
            return Err(PatternError::QueryString(template.to_string()));
        }

        let segments = path_segments(template)
            .map(|segment| match segment.strip_prefix(':') {
                Some("") => Err(PatternError::EmptyParameter(template.to_string())),
                Some(_) => Ok(Segment::Param),
                None if segment.contains('*') => {
                    Err(PatternError::MisplacedWildcard(template.to_string()))
                }
                None => Ok(Segment::Literal(segment.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Segment counts must agree and every literal must be equal.
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path_segments(path);
        for segment in &self.segments {
            match (segment, parts.next()) {
                (_, None) | (Segment::Param, Some("")) => return false,
                (Segment::Param, Some(_)) => {}
                (Segment::Literal(lit), Some(part)) if lit == part => {}
                (Segment::Literal(_), Some(_)) => return false,
            }
        }
        parts.next().is_none()
    }
}

/// Segments after the leading `/`; empty segments are kept so `a//b` and
/// `a/b/` never line up with `a/b`.
fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}

/// Path part of a request target, without query string or fragment
pub fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// Whether `path` matches any bypass template
pub fn matches_bypass(path: &str, routes: &[RoutePattern]) -> bool {
    let path = strip_query(path);
    routes.iter().any(|route| route.matches(path))
}

/// Result of a secret lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretValidation {
    Valid(ApplicationIdentity),
    Invalid,
}

/// Credential store failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidatorError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Lookup collaborator for client secrets
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ClientSecretValidator: Send + Sync {
    /// Check a presented secret against registered applications
    async fn validate(&self, secret: &str) -> Result<SecretValidation, ValidatorError>;
}

/// Registered application record
#[derive(Debug, Clone)]
pub struct ClientAppRecord {
    /// Hash of the secret (never store plaintext)
    pub secret_hash: String,
    pub app_id: String,
    pub app_name: String,
    pub active: bool,
}

/// In-memory application registry
pub struct InMemoryClientRegistry {
    apps: RwLock<HashMap<String, ClientAppRecord>>,
}

impl InMemoryClientRegistry {
    pub fn new() -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a new client secret
    ///
    /// Returns (plaintext_secret, secret_hash)
    pub fn generate_secret() -> (String, String) {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let random_bytes: [u8; 32] = rng.gen();
        let random_part = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            random_bytes,
        );

        let plaintext = format!("{}{}", CLIENT_SECRET_PREFIX, random_part);
        let hash = Self::hash_secret(&plaintext);
        (plaintext, hash)
    }

    /// Hash a client secret for storage
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn register(&self, record: ClientAppRecord) {
        self.apps.write().insert(record.secret_hash.clone(), record);
    }

    /// Deactivate the application holding `secret_hash`
    pub fn revoke(&self, secret_hash: &str) {
        if let Some(record) = self.apps.write().get_mut(secret_hash) {
            record.active = false;
        }
    }

    pub fn len(&self) -> usize {
        self.apps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.read().is_empty()
    }
}

impl Default for InMemoryClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ClientSecretValidator for InMemoryClientRegistry {
    async fn validate(&self, secret: &str) -> Result<SecretValidation, ValidatorError> {
        let hash = Self::hash_secret(secret);
        let apps = self.apps.read();
        Ok(match apps.get(&hash) {
            Some(record) if record.active => SecretValidation::Valid(ApplicationIdentity {
                app_id: record.app_id.clone(),
                app_name: record.app_name.clone(),
            }),
            _ => SecretValidation::Invalid,
        })
    }
}

/// Successful guard pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardPass {
    /// Set when a secret was presented and validated
    pub app: Option<ApplicationIdentity>,
}

/// Enforces client secrets on API routes
pub struct ClientSecretGuard {
    require_for_all_apis: bool,
    bypass_routes: Vec<RoutePattern>,
    header: HeaderName,
    validator: Arc<dyn ClientSecretValidator>,
}

impl ClientSecretGuard {
    pub fn new(
        require_for_all_apis: bool,
        bypass_routes: Vec<RoutePattern>,
        header: HeaderName,
        validator: Arc<dyn ClientSecretValidator>,
    ) -> Self {
        Self {
            require_for_all_apis,
            bypass_routes,
            header,
            validator,
        }
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Gate a request on its client secret.
    pub async fn check(&self, url: &str, headers: &HeaderMap) -> Result<GuardPass, AuthError> {
        if !self.require_for_all_apis {
            return Ok(GuardPass::default());
        }

        let path = strip_query(url);
        if matches_bypass(path, &self.bypass_routes) {
            debug!(path, "client secret bypassed");
            return Ok(GuardPass::default());
        }

        let Some(secret) = header_value(headers, &self.header) else {
            debug!(path, "client secret missing");
            return Err(AuthError::MissingClientSecret);
        };

        let app = self.authenticate(secret).await?;
        Ok(GuardPass { app: Some(app) })
    }

    /// Validate a presented secret.
    ///
    /// Collaborator errors and panics both become `VerificationFailed`; the
    /// call is never retried.
    pub async fn authenticate(&self, secret: &str) -> Result<ApplicationIdentity, AuthError> {
        let outcome = AssertUnwindSafe(async { self.validator.validate(secret).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(SecretValidation::Valid(app))) => Ok(app),
            Ok(Ok(SecretValidation::Invalid)) => {
                warn!("invalid client secret presented");
                Err(AuthError::InvalidClientSecret)
            }
            Ok(Err(e)) => {
                error!(error = %e, "client secret validation failed");
                Err(AuthError::VerificationFailed)
            }
            Err(_) => {
                error!("client secret validator panicked");
                Err(AuthError::VerificationFailed)
            }
        }
    }
}
