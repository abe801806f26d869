//! REST API handlers organized by domain.

pub mod admin;
pub mod health;
pub mod session;

pub use admin::*;
pub use health::*;
pub use session::*;
