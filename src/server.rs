//! HTTP server bootstrap for the navigation gateway.
//!
//! This module wires together:
//! - configuration
//! - the client-secret registry and session verifier
//! - the gateway layer
//! - the Axum router

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::AllowOrigin;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::api::handlers::health_check;
use crate::auth::{
    ClientAppRecord, ClientSecretValidator, CookiePolicy, Gateway, InMemoryClientRegistry,
    JwtSessionVerifier, SessionVerifier, APP_SOURCE_HEADER,
};
use crate::config::{GatewayConfig, SessionConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server listen address.
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {host}:{port}: {e}"))?;

        Ok(Self { listen_addr })
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Issues and refreshes session tokens; `None` when no session secret is set
    pub sessions: Option<Arc<JwtSessionVerifier>>,
    pub cookies: Arc<CookiePolicy>,
    pub session: SessionConfig,
    pub trust_proxy: bool,
}

impl AppState {
    /// Assemble state from a validated configuration.
    pub fn new(
        config: &GatewayConfig,
        validator: Arc<dyn ClientSecretValidator>,
        sessions: Option<Arc<JwtSessionVerifier>>,
    ) -> anyhow::Result<Self> {
        let verifier = sessions
            .clone()
            .map(|sessions| sessions as Arc<dyn SessionVerifier>);
        let gateway = config.build_gateway(validator, verifier)?;

        Ok(Self {
            gateway: Arc::new(gateway),
            sessions,
            cookies: Arc::new(config.cookie_policy()),
            session: config.session,
            trust_proxy: config.trust_proxy,
        })
    }
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting nav-gateway v{}", env!("CARGO_PKG_VERSION"));

    let gateway_config = GatewayConfig::load()?;
    info!(
        environment = ?gateway_config.environment,
        rate_limit_enabled = gateway_config.rate_limit.enabled,
        client_secret_required = gateway_config.client_secret.require_for_all_apis,
        trust_proxy = gateway_config.trust_proxy,
        "Gateway configuration loaded"
    );

    let registry = Arc::new(InMemoryClientRegistry::new());
    if let Ok(bootstrap_secret) = std::env::var("BOOTSTRAP_CLIENT_SECRET") {
        registry.register(ClientAppRecord {
            secret_hash: InMemoryClientRegistry::hash_secret(bootstrap_secret.trim()),
            app_id: "bootstrap".to_string(),
            app_name: "Bootstrap application".to_string(),
            active: true,
        });
        info!("Bootstrap client secret is configured");
    }

    let sessions = match std::env::var("JWT_SECRET") {
        Ok(secret) => {
            let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "nav-gateway".to_string());
            let audience = std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "nav-api".to_string());
            Some(Arc::new(JwtSessionVerifier::new(
                secret.as_bytes(),
                &issuer,
                &audience,
            )))
        }
        Err(_) => {
            warn!("JWT_SECRET not set; bearer tokens will be treated as anonymous");
            None
        }
    };

    if gateway_config.client_secret.require_for_all_apis && registry.is_empty() {
        warn!("Client secrets are required but no application is registered");
    }

    let state = AppState::new(&gateway_config, registry, sessions)?;

    let config = Config::from_env()?;
    let app = build_router(state)?;

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("nav-gateway is ready to accept connections");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Install the global tracing subscriber; JSON output when `LOG_JSON` is set.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let json = std::env::var("LOG_JSON")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Build the full router: `/api` behind the gateway, `/health` outside it.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let api = crate::api::router().layer(axum::middleware::from_fn_with_state(
        state.gateway.clone(),
        crate::auth::gateway_middleware,
    ));

    let mut router = Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer_from_env(&state)? {
        router = router.layer(cors_layer);
    }

    Ok(router.with_state(state))
}

fn cors_layer_from_env(state: &AppState) -> anyhow::Result<Option<CorsLayer>> {
    let origins = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(APP_SOURCE_HEADER),
            state.gateway.client_secret_header().clone(),
        ]);

    // Cookies only cross origins with an explicit allowlist
    if origins != "*" {
        layer = layer.allow_credentials(true);
    }

    Ok(Some(layer))
}
