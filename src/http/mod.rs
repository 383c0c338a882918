//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → pipeline.rs (security stages in order)
//!     → body.rs (decode admitted bodies)
//!     → report sink or 404 fallback
//! ```

pub mod body;
pub mod pipeline;
pub mod request;
pub mod server;

pub use body::ParsedBody;
pub use pipeline::{Pipeline, PipelineError, Stage, StageContext};
pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
