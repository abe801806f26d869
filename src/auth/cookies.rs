//! Session cookie policy
//!
//! Cookie names are always scoped to the request source, so an admin-panel
//! token is never read back as a main-site session even when both front-ends
//! share a parent domain. Domain attributes follow one of three strategies:
//!
//! - `auto`: host-only cookies (no `Domain` attribute)
//! - `fixed`: one configured domain for every cookie
//! - `allowlist`: domain chosen by source key, then by request host, falling
//!   back to host-only

use std::collections::HashMap;

use axum::http::header::HOST;
use axum::http::{HeaderMap, Uri};
use serde::{Deserialize, Serialize};

use super::RequestSource;

/// Source-scoped session cookie names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieNames {
    pub access: &'static str,
    pub refresh: &'static str,
}

impl CookieNames {
    pub fn for_source(source: RequestSource) -> Self {
        match source {
            RequestSource::Main => Self {
                access: "access_token_main",
                refresh: "refresh_token_main",
            },
            RequestSource::Admin => Self {
                access: "access_token_admin",
                refresh: "refresh_token_admin",
            },
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "test" => Some(Self::Test),
            "staging" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Cookie `Domain` strategy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CookieDomainConfig {
    #[default]
    Auto,
    Fixed {
        #[serde(default)]
        domain: Option<String>,
    },
    Allowlist {
        /// Keyed by source (`main`/`admin`) or by request host
        #[serde(default)]
        domains: HashMap<String, String>,
    },
}

/// Invalid cookie settings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CookieConfigError {
    #[error("invalid cookie domain {0:?}")]
    InvalidDomain(String),

    #[error("empty key in cookie domain allowlist")]
    EmptyAllowlistKey,
}

impl CookieDomainConfig {
    pub fn validate(&self) -> Result<(), CookieConfigError> {
        match self {
            Self::Auto | Self::Fixed { domain: None } => Ok(()),
            Self::Fixed {
                domain: Some(domain),
            } => validate_domain(domain),
            Self::Allowlist { domains } => {
                for (key, domain) in domains {
                    if key.trim().is_empty() {
                        return Err(CookieConfigError::EmptyAllowlistKey);
                    }
                    validate_domain(domain)?;
                }
                Ok(())
            }
        }
    }

    /// Domain attribute for a request; `None` means host-only.
    pub fn resolve(&self, source: RequestSource, host: Option<&str>) -> Option<String> {
        match self {
            Self::Auto => None,
            Self::Fixed { domain } => domain.clone(),
            Self::Allowlist { domains } => domains
                .get(source.as_str())
                .or_else(|| host.and_then(|h| domains.get(h)))
                .cloned(),
        }
    }
}

fn validate_domain(domain: &str) -> Result<(), CookieConfigError> {
    let trimmed = domain.trim_start_matches('.');
    let ok = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(CookieConfigError::InvalidDomain(domain.to_string()))
    }
}

/// Request attributes relevant to cookie issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub source: RequestSource,
    /// Host without port
    pub host: Option<String>,
    pub is_https: bool,
}

impl RequestMeta {
    /// Derive from headers, honouring `X-Forwarded-Host`/`X-Forwarded-Proto`
    /// when `trust_proxy` is set.
    pub fn from_request(headers: &HeaderMap, uri: &Uri, trust_proxy: bool) -> Self {
        let forwarded = |name: &str| {
            trust_proxy
                .then(|| headers.get(name).and_then(|v| v.to_str().ok()))
                .flatten()
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let host = forwarded("x-forwarded-host")
            .or_else(|| headers.get(HOST).and_then(|v| v.to_str().ok()))
            .or_else(|| uri.host())
            .map(strip_port);

        let is_https = match forwarded("x-forwarded-proto") {
            Some(proto) => proto.eq_ignore_ascii_case("https"),
            None => uri.scheme_str() == Some("https"),
        };

        Self {
            source: RequestSource::from_headers(headers),
            host,
            is_https,
        }
    }
}

fn strip_port(host: &str) -> String {
    let host = host.trim();
    // Bracketed IPv6 literal
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_ascii_lowercase();
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name.to_ascii_lowercase()
        }
        _ => host.to_ascii_lowercase(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

/// Attributes for a session cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub domain: Option<String>,
}

impl CookieOptions {
    /// Render a `Set-Cookie` header value
    pub fn set_cookie(&self, name: &str, value: &str, max_age_secs: Option<i64>) -> String {
        let mut out = format!("{name}={value}; Path={}", self.path);
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = max_age_secs {
            out.push_str(&format!("; Max-Age={}", max_age.max(0)));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out.push_str("; SameSite=");
        out.push_str(self.same_site.as_str());
        out
    }

    /// `Set-Cookie` value that deletes the cookie
    pub fn expire(&self, name: &str) -> String {
        self.set_cookie(name, "", Some(0))
    }
}

/// Cookie issuance policy
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    environment: Environment,
    domain: CookieDomainConfig,
}

impl CookiePolicy {
    pub fn new(environment: Environment, domain: CookieDomainConfig) -> Self {
        Self {
            environment,
            domain,
        }
    }

    pub fn build_cookie_options(&self, meta: &RequestMeta, path: &str) -> CookieOptions {
        CookieOptions {
            http_only: true,
            // Never on plaintext development traffic
            secure: self.environment.is_production() && meta.is_https,
            same_site: SameSite::Lax,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            domain: self.domain.resolve(meta.source, meta.host.as_deref()),
        }
    }

    pub fn names(&self, meta: &RequestMeta) -> CookieNames {
        CookieNames::for_source(meta.source)
    }

    /// `Set-Cookie` values for a freshly issued session
    pub fn session_cookies(
        &self,
        meta: &RequestMeta,
        access: (&str, i64),
        refresh: (&str, i64),
    ) -> [String; 2] {
        let options = self.build_cookie_options(meta, "/");
        let names = self.names(meta);
        [
            options.set_cookie(names.access, access.0, Some(access.1)),
            options.set_cookie(names.refresh, refresh.0, Some(refresh.1)),
        ]
    }

    /// `Set-Cookie` values that clear the session
    pub fn clear_session_cookies(&self, meta: &RequestMeta) -> [String; 2] {
        let options = self.build_cookie_options(meta, "/");
        let names = self.names(meta);
        [options.expire(names.access), options.expire(names.refresh)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(source: RequestSource, host: Option<&str>, is_https: bool) -> RequestMeta {
        RequestMeta {
            source,
            host: host.map(str::to_string),
            is_https,
        }
    }

    fn allowlist(entries: &[(&str, &str)]) -> CookieDomainConfig {
        CookieDomainConfig::Allowlist {
            domains: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_names_are_source_scoped() {
        assert_eq!(CookieNames::for_source(RequestSource::Main).access, "access_token_main");
        assert_eq!(CookieNames::for_source(RequestSource::Admin).access, "access_token_admin");
        assert_eq!(
            CookieNames::for_source(RequestSource::Admin).refresh,
            "refresh_token_admin"
        );
    }

    #[test]
    fn test_auto_is_always_host_only() {
        let auto = CookieDomainConfig::Auto;
        for source in [RequestSource::Main, RequestSource::Admin] {
            for host in [None, Some("nav.example.com"), Some("admin.example.com")] {
                assert_eq!(auto.resolve(source, host), None);
            }
        }
    }

    #[test]
    fn test_fixed_ignores_host_and_source() {
        let fixed = CookieDomainConfig::Fixed {
            domain: Some(".example.com".to_string()),
        };
        assert_eq!(
            fixed.resolve(RequestSource::Admin, Some("elsewhere.test")),
            Some(".example.com".to_string())
        );

        let unset = CookieDomainConfig::Fixed { domain: None };
        assert_eq!(unset.resolve(RequestSource::Main, Some("nav.example.com")), None);
    }

    #[test]
    fn test_allowlist_resolution_order() {
        let config = allowlist(&[
            ("admin", "admin.example.com"),
            ("nav.example.org", ".example.org"),
        ]);

        assert_eq!(
            config.resolve(RequestSource::Admin, Some("nav.example.org")),
            Some("admin.example.com".to_string())
        );
        assert_eq!(
            config.resolve(RequestSource::Main, Some("nav.example.org")),
            Some(".example.org".to_string())
        );
        assert_eq!(config.resolve(RequestSource::Main, Some("unknown.test")), None);
        assert_eq!(config.resolve(RequestSource::Main, None), None);
    }

    #[test]
    fn test_secure_requires_production_and_https() {
        let prod = CookiePolicy::new(Environment::Production, CookieDomainConfig::Auto);
        let dev = CookiePolicy::new(Environment::Development, CookieDomainConfig::Auto);

        let https = meta(RequestSource::Main, Some("nav.example.com"), true);
        let http = meta(RequestSource::Main, Some("localhost"), false);

        assert!(prod.build_cookie_options(&https, "/").secure);
        assert!(!prod.build_cookie_options(&http, "/").secure);
        assert!(!dev.build_cookie_options(&https, "/").secure);

        let options = prod.build_cookie_options(&https, "/");
        assert!(options.http_only);
        assert_eq!(options.same_site, SameSite::Lax);
        assert_eq!(options.path, "/");
    }

    #[test]
    fn test_set_cookie_rendering() {
        let policy = CookiePolicy::new(
            Environment::Production,
            CookieDomainConfig::Fixed {
                domain: Some(".example.com".to_string()),
            },
        );
        let meta = meta(RequestSource::Admin, Some("admin.example.com"), true);

        let [access, refresh] = policy.session_cookies(&meta, ("a1", 900), ("r1", 604_800));
        assert_eq!(
            access,
            "access_token_admin=a1; Path=/; Domain=.example.com; Max-Age=900; HttpOnly; Secure; SameSite=Lax"
        );
        assert!(refresh.starts_with("refresh_token_admin=r1;"));

        let [cleared, _] = policy.clear_session_cookies(&meta);
        assert!(cleared.starts_with("access_token_admin=; Path=/"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[test]
    fn test_request_meta_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "nav.example.com:8080".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        headers.insert("x-app-source", "admin".parse().unwrap());
        let uri: Uri = "/api/auth/refresh".parse().unwrap();

        let trusted = RequestMeta::from_request(&headers, &uri, true);
        assert_eq!(trusted.host.as_deref(), Some("nav.example.com"));
        assert!(trusted.is_https);
        assert_eq!(trusted.source, RequestSource::Admin);

        let untrusted = RequestMeta::from_request(&headers, &uri, false);
        assert!(!untrusted.is_https);
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("Example.com:443"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("localhost"), "localhost");
    }

    #[test]
    fn test_domain_validation() {
        assert!(CookieDomainConfig::Auto.validate().is_ok());
        assert!(allowlist(&[("main", ".example.com")]).validate().is_ok());
        assert_eq!(
            allowlist(&[("main", "https://example.com")]).validate(),
            Err(CookieConfigError::InvalidDomain("https://example.com".to_string()))
        );
        assert_eq!(
            allowlist(&[(" ", "example.com")]).validate(),
            Err(CookieConfigError::EmptyAllowlistKey)
        );
        assert!(CookieDomainConfig::Fixed {
            domain: Some("".to_string())
        }
        .validate()
        .is_err());
    }
}
