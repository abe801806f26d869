//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use http_body_util::BodyExt;
use tower::ServiceExt;

use nav_gateway::auth::{
    ClientAppRecord, ClientSecretValidator, InMemoryClientRegistry, JwtSessionVerifier,
    UserIdentity,
};
use nav_gateway::config::GatewayConfig;
use nav_gateway::server::{build_router, AppState};

pub const JWT_SECRET: &[u8] = b"integration-test-secret";
pub const JWT_ISSUER: &str = "nav-gateway";
pub const JWT_AUDIENCE: &str = "nav-api";

/// Fully wired application plus handles on its collaborators
pub struct TestApp {
    pub router: Router,
    pub registry: Arc<InMemoryClientRegistry>,
    pub sessions: Arc<JwtSessionVerifier>,
    pub state: AppState,
}

impl TestApp {
    /// Build the router from `config`, trusting `X-Forwarded-For` so tests
    /// can choose the client IP.
    pub fn new(mut config: GatewayConfig) -> Self {
        config.trust_proxy = true;
        let registry = Arc::new(InMemoryClientRegistry::new());
        Self::with_validator(config, registry.clone(), registry)
    }

    pub fn with_validator(
        config: GatewayConfig,
        registry: Arc<InMemoryClientRegistry>,
        validator: Arc<dyn ClientSecretValidator>,
    ) -> Self {
        let sessions = Arc::new(JwtSessionVerifier::new(JWT_SECRET, JWT_ISSUER, JWT_AUDIENCE));
        let state = AppState::new(&config, validator, Some(sessions.clone())).unwrap();
        let router = build_router(state.clone()).unwrap();
        Self {
            router,
            registry,
            sessions,
            state,
        }
    }

    /// Register an active application and return its plaintext secret
    pub fn register_app(&self, app_id: &str) -> String {
        let (secret, hash) = InMemoryClientRegistry::generate_secret();
        self.registry.register(ClientAppRecord {
            secret_hash: hash,
            app_id: app_id.to_string(),
            app_name: format!("{app_id} app"),
            active: true,
        });
        secret
    }

    pub fn access_token(&self, user_id: &str, roles: &[&str]) -> String {
        self.sessions
            .issue_access(&test_user(user_id, roles), Duration::minutes(15))
            .unwrap()
    }

    pub fn refresh_token(&self, user_id: &str, roles: &[&str]) -> String {
        self.sessions
            .issue_refresh(&test_user(user_id, roles), Duration::days(7))
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.body["error"]["code"].as_str()
    }
}

pub fn test_user(user_id: &str, roles: &[&str]) -> UserIdentity {
    UserIdentity {
        user_id: user_id.to_string(),
        username: format!("user-{user_id}"),
        raw_roles: roles.iter().map(|r| r.to_string()).collect(),
        raw_groups: vec!["editors".to_string()],
        permissions: vec!["navs:read".to_string()],
    }
}

/// Request builder with the client IP set through `X-Forwarded-For`
pub fn request(method: Method, uri: &str, ip: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "nav.example")
        .header("x-forwarded-for", ip)
}

pub fn get(uri: &str, ip: &str) -> Request<Body> {
    request(Method::GET, uri, ip).body(Body::empty()).unwrap()
}
