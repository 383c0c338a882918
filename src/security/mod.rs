//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (stamp security headers on the way out)
//!     → reporting.rs (Report-To / NEL on the way out)
//!     → rate_limit.rs (client_key.rs → store.rs, 429 when over quota)
//!     → Pass to body parsing and handlers
//! ```
//!
//! # Design Decisions
//! - Header stages wrap the limiter so rejections carry the same policy
//! - The limiter never awaits: one map operation per request
//! - Time comes from an injected clock so windows are testable

pub mod client_key;
pub mod clock;
pub mod headers;
pub mod rate_limit;
pub mod reporting;
pub mod store;

pub use client_key::{ClientKeyExtractor, ForwardedForExtractor, PeerIpExtractor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::SecurityHeaders;
pub use rate_limit::{Quota, RateLimitError, RateLimitState, RateLimiter};
pub use reporting::ReportingHeaders;
pub use store::{MemoryStore, StoreError, WindowRecord, WindowStore};
