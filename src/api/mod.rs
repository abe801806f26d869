//! HTTP API for the navigation gateway
//!
//! Session endpoints and the administrative surface of the gateway itself.
//! Business routes are mounted by the embedding service behind the same
//! gateway layer.

pub mod error;
pub mod handlers;
mod rest;
pub mod types;

pub use rest::*;
