//! Edge Shield Library
//!
//! HTTP security front: per-client fixed-window rate limiting, security
//! response headers, Reporting API headers with a report sink, and body
//! decoding, wired as an ordered Axum middleware pipeline.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ShieldConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::rate_limit::RateLimiter;
