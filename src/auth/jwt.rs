//! Session tokens
//!
//! HS256 JWTs carrying the user identity claim set. Access tokens
//! authenticate API calls; refresh tokens are only accepted by the refresh
//! route.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::UserIdentity;

/// Token purpose, carried in the `typ` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims for navigation sessions
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    pub username: String,

    /// Raw role slugs
    #[serde(default)]
    pub roles: Vec<String>,

    /// Raw group slugs
    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub perms: Vec<String>,

    pub typ: TokenKind,

    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
}

/// Session verification failure
///
/// Bad signature, expiry, malformed token and wrong token kind all collapse
/// into `Invalid`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid session token")]
    Invalid,

    #[error("session verifier unavailable: {0}")]
    Unavailable(String),

    #[error("failed to issue token: {0}")]
    Issue(String),
}

/// Bearer-token verification primitive
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SessionVerifier: Send + Sync {
    /// Verify an access token and decode its identity
    async fn verify(&self, token: &str) -> Result<UserIdentity, VerifyError>;
}

/// JWT issuer and verifier
pub struct JwtSessionVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl JwtSessionVerifier {
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        }
    }

    pub fn issue_access(&self, user: &UserIdentity, ttl: Duration) -> Result<String, VerifyError> {
        self.issue(user, TokenKind::Access, ttl)
    }

    pub fn issue_refresh(&self, user: &UserIdentity, ttl: Duration) -> Result<String, VerifyError> {
        self.issue(user, TokenKind::Refresh, ttl)
    }

    fn issue(&self, user: &UserIdentity, typ: TokenKind, ttl: Duration) -> Result<String, VerifyError> {
        let now = Utc::now();
        let exp = now + ttl;

        let claims = Claims {
            sub: user.user_id.clone(),
            username: user.username.clone(),
            roles: user.raw_roles.clone(),
            groups: user.raw_groups.clone(),
            perms: user.permissions.clone(),
            typ,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| VerifyError::Issue(e.to_string()))
    }

    /// Decode a token of the expected kind.
    pub fn decode_kind(&self, token: &str, expected: TokenKind) -> Result<UserIdentity, VerifyError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            // Kind only reaches debug logs, never the caller.
            debug!(reason = ?e.kind(), "session token rejected");
            VerifyError::Invalid
        })?;

        let claims = token_data.claims;
        if claims.typ != expected || claims.sub.is_empty() {
            debug!(typ = ?claims.typ, "session token rejected");
            return Err(VerifyError::Invalid);
        }

        Ok(UserIdentity {
            user_id: claims.sub,
            username: claims.username,
            raw_roles: claims.roles,
            raw_groups: claims.groups,
            permissions: claims.perms,
        })
    }
}

#[async_trait::async_trait]
impl SessionVerifier for JwtSessionVerifier {
    async fn verify(&self, token: &str) -> Result<UserIdentity, VerifyError> {
        self.decode_kind(token, TokenKind::Access)
    }
}
