//! Gateway configuration
//!
//! Loaded once at startup: an optional JSON file named by `GATEWAY_CONFIG`,
//! then environment overrides. Everything is validated eagerly so a bad
//! route pattern or cookie domain fails the boot rather than a request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{
    AccessConfig, AccessPolicy, ClientSecretGuard, ClientSecretValidator, CookieConfigError,
    CookieDomainConfig, CookiePolicy, Environment, Gateway, PatternError, RateLimitConfig,
    RateLimitConfigError, RateLimitPolicy, RateLimiter, RoutePattern, SessionVerifier,
    DEFAULT_CLIENT_SECRET_HEADER,
};

/// Environment variable naming the JSON config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("invalid client secret header name {0:?}")]
    InvalidHeader(String),

    #[error("invalid bypass route: {0}")]
    BypassRoute(#[from] PatternError),

    #[error("invalid rate limit config: {0}")]
    RateLimit(#[from] RateLimitConfigError),

    #[error("invalid access rule: {0}")]
    Access(PatternError),

    #[error("invalid cookie config: {0}")]
    Cookie(#[from] CookieConfigError),
}

/// Client-secret guard settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSecretConfig {
    /// Demand a secret on every API route outside `bypass_routes`
    pub require_for_all_apis: bool,
    /// Route templates, `:param` segments allowed
    pub bypass_routes: Vec<String>,
    pub header: String,
}

impl Default for ClientSecretConfig {
    fn default() -> Self {
        Self {
            require_for_all_apis: false,
            bypass_routes: Vec::new(),
            header: DEFAULT_CLIENT_SECRET_HEADER.to_string(),
        }
    }
}

/// Session token lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Full gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub environment: Environment,
    /// Honour `X-Forwarded-*` headers
    pub trust_proxy: bool,
    pub client_secret: ClientSecretConfig,
    pub rate_limit: RateLimitConfig,
    pub cookie_domain: CookieDomainConfig,
    pub access: AccessConfig,
    pub session: SessionConfig,
}

impl GatewayConfig {
    /// Load from `GATEWAY_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "gateway config file loaded");
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(value) = var("APP_ENV") {
            self.environment = Environment::parse(&value).ok_or(ConfigError::InvalidValue {
                name: "APP_ENV",
                value,
            })?;
        }
        if let Some(value) = var("RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_bool("RATE_LIMIT_ENABLED", value)?;
        }
        if let Some(value) = var("CLIENT_SECRET_REQUIRED") {
            self.client_secret.require_for_all_apis = parse_bool("CLIENT_SECRET_REQUIRED", value)?;
        }
        if let Some(value) = var("CLIENT_SECRET_HEADER") {
            self.client_secret.header = value;
        }
        if let Some(value) = var("TRUST_PROXY") {
            self.trust_proxy = parse_bool("TRUST_PROXY", value)?;
        }

        if let Some(mode) = var("COOKIE_DOMAIN_MODE") {
            self.cookie_domain = match mode.to_ascii_lowercase().as_str() {
                "auto" => CookieDomainConfig::Auto,
                "fixed" => CookieDomainConfig::Fixed {
                    domain: var("COOKIE_DOMAIN"),
                },
                "allowlist" => CookieDomainConfig::Allowlist {
                    domains: var("COOKIE_DOMAIN_ALLOWLIST")
                        .map(|list| parse_allowlist(&list))
                        .transpose()?
                        .unwrap_or_default(),
                },
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "COOKIE_DOMAIN_MODE",
                        value: mode,
                    })
                }
            };
        } else if let Some(domain) = var("COOKIE_DOMAIN") {
            if let CookieDomainConfig::Fixed { domain: slot } = &mut self.cookie_domain {
                *slot = Some(domain);
            }
        }

        Ok(())
    }

    /// Check every section without building anything long-lived.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.header_name()?;
        self.bypass_routes()?;
        RateLimitPolicy::compile(&self.rate_limit)?;
        AccessPolicy::compile(&self.access).map_err(ConfigError::Access)?;
        self.cookie_domain.validate()?;
        if self.session.access_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "session.access_ttl_secs",
                value: self.session.access_ttl_secs.to_string(),
            });
        }
        if self.session.refresh_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "session.refresh_ttl_secs",
                value: self.session.refresh_ttl_secs.to_string(),
            });
        }
        Ok(())
    }

    pub fn header_name(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.client_secret.header.to_ascii_lowercase().as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(self.client_secret.header.clone()))
    }

    pub fn bypass_routes(&self) -> Result<Vec<RoutePattern>, ConfigError> {
        self.client_secret
            .bypass_routes
            .iter()
            .map(|route| RoutePattern::parse(route).map_err(ConfigError::from))
            .collect()
    }

    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy::new(self.environment, self.cookie_domain.clone())
    }

    /// Assemble the gateway from this configuration and its collaborators.
    pub fn build_gateway(
        &self,
        validator: Arc<dyn ClientSecretValidator>,
        verifier: Option<Arc<dyn SessionVerifier>>,
    ) -> Result<Gateway, ConfigError> {
        let guard = ClientSecretGuard::new(
            self.client_secret.require_for_all_apis,
            self.bypass_routes()?,
            self.header_name()?,
            validator,
        );
        let limiter = Arc::new(RateLimiter::new(RateLimitPolicy::compile(&self.rate_limit)?));
        let access = AccessPolicy::compile(&self.access).map_err(ConfigError::Access)?;

        let gateway = Gateway::new(guard, limiter, access).with_trust_proxy(self.trust_proxy);
        Ok(match verifier {
            Some(verifier) => gateway.with_verifier(verifier),
            None => gateway,
        })
    }
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name, value }),
    }
}

/// `key=domain` pairs separated by commas
fn parse_allowlist(list: &str) -> Result<HashMap<String, String>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, domain)) => Ok((key.trim().to_string(), domain.trim().to_string())),
            None => Err(ConfigError::InvalidValue {
                name: "COOKIE_DOMAIN_ALLOWLIST",
                value: pair.to_string(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RateLimitEntry;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_validate() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.rate_limit.enabled);
        assert!(!config.client_secret.require_for_all_apis);
        assert_eq!(config.client_secret.header, "x-client-secret");
        assert_eq!(config.cookie_domain, CookieDomainConfig::Auto);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides(overrides(&[
                ("APP_ENV", "production"),
                ("RATE_LIMIT_ENABLED", "false"),
                ("CLIENT_SECRET_REQUIRED", "1"),
                ("CLIENT_SECRET_HEADER", "X-Nav-Secret"),
                ("COOKIE_DOMAIN_MODE", "fixed"),
                ("COOKIE_DOMAIN", ".nav.example"),
                ("TRUST_PROXY", "yes"),
            ]))
            .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert!(!config.rate_limit.enabled);
        assert!(config.client_secret.require_for_all_apis);
        assert_eq!(config.header_name().unwrap().as_str(), "x-nav-secret");
        assert_eq!(
            config.cookie_domain,
            CookieDomainConfig::Fixed {
                domain: Some(".nav.example".to_string())
            }
        );
        assert!(config.trust_proxy);
    }

    #[test]
    fn test_allowlist_override() {
        let mut config = GatewayConfig::default();
        config
            .apply_overrides(overrides(&[
                ("COOKIE_DOMAIN_MODE", "allowlist"),
                (
                    "COOKIE_DOMAIN_ALLOWLIST",
                    "main=nav.example, admin=admin.nav.example",
                ),
            ]))
            .unwrap();

        match &config.cookie_domain {
            CookieDomainConfig::Allowlist { domains } => {
                assert_eq!(domains["main"], "nav.example");
                assert_eq!(domains["admin"], "admin.nav.example");
            }
            other => panic!("unexpected cookie domain config: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_overrides() {
        let mut config = GatewayConfig::default();
        assert!(matches!(
            config.apply_overrides(overrides(&[("TRUST_PROXY", "maybe")])),
            Err(ConfigError::InvalidValue {
                name: "TRUST_PROXY",
                ..
            })
        ));
        assert!(matches!(
            config.apply_overrides(overrides(&[("COOKIE_DOMAIN_MODE", "wildcard")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = GatewayConfig::default();
        config.client_secret.bypass_routes = vec!["api/navs".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::BypassRoute(_))));

        let mut config = GatewayConfig::default();
        config
            .rate_limit
            .routes
            .insert("/api/navs".to_string(), RateLimitEntry::new(0, 1_000));
        assert!(matches!(config.validate(), Err(ConfigError::RateLimit(_))));

        let mut config = GatewayConfig::default();
        config.cookie_domain = CookieDomainConfig::Fixed {
            domain: Some("bad domain".to_string()),
        };
        assert!(matches!(config.validate(), Err(ConfigError::Cookie(_))));

        let mut config = GatewayConfig::default();
        config.client_secret.header = "bad header".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_json_config() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "environment": "staging",
            "client_secret": {
                "require_for_all_apis": true,
                "bypass_routes": ["/api/public/:slug"]
            },
            "rate_limit": {
                "defaults": {
                    "anonymous": { "limit": 20, "interval_ms": 60000 },
                    "authenticated": { "limit": 200, "interval_ms": 60000 },
                    "admin": { "limit": 2000, "interval_ms": 60000 }
                },
                "blacklist": ["198.51.100.4"]
            },
            "cookie_domain": { "mode": "allowlist", "domains": { "admin": "admin.nav.example" } }
        }))
        .unwrap();

        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.client_secret.header, "x-client-secret");
        assert_eq!(config.rate_limit.defaults.anonymous.limit, 20);
        // Unspecified route table falls back to the defaults
        assert!(config.rate_limit.routes.contains_key("/api/auth/login"));
        assert!(config.validate().is_ok());
    }
}
