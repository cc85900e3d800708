//! HTTP middleware for madrasha-billing.

pub mod admin;
pub mod metrics;

pub use admin::{admin_auth_middleware, ADMIN_API_KEY_HEADER};
pub use metrics::metrics_middleware;
