//! Navigation Gateway Library
//!
//! Request security gateway for the bookmark-navigation backend. Every API
//! call passes through one gateway pass before it reaches business logic.
//!
//! ## Modules
//!
//! - [`auth`] - Credentials, client secrets, sessions, RBAC, rate limiting, cookies
//! - [`config`] - Gateway configuration loading and validation
//! - [`api`] - REST routes and the error envelope
//! - [`server`] - HTTP server bootstrap

pub mod api;
pub mod auth;
pub mod config;
pub mod server;

// Re-export commonly used types
pub use auth::{
    AuthError, Gateway, GatewayContext, Identity, RateLimiter, RequestSource, Role,
};
pub use config::{ConfigError, GatewayConfig};
