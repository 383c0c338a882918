//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, apply PORT / RATE_LIMIT_* overrides)
//!     → validation.rs (semantic checks)
//!     → ShieldConfig (validated, immutable)
//!     → handed to the server and its stages at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{
    BodyConfig, KeySource, ListenerConfig, ObservabilityConfig, RateLimitAlgorithm,
    RateLimitConfig, ReportingConfig, SecurityHeadersConfig, ShieldConfig, StoreFailurePolicy,
};
