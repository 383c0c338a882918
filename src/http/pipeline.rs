//! Ordered request pipeline.
//!
//! # Responsibilities
//! - Name the middleware stages and their order
//! - Refuse orders that would break the stage contracts
//! - Layer the stages onto a router, first stage outermost
//!
//! # Design Decisions
//! - Order is data, not the accident of `.layer()` call order
//! - `SecurityHeaders` must wrap `RateLimit` so 429s carry the policy
//! - `BodyParser` must sit inside `RateLimit` so rejected bodies are never read
//!
//! # Data Flow
//! ```text
//! request  → SecurityHeaders → Reporting → RateLimit → BodyParser → handler
//! response ← SecurityHeaders ← Reporting ← RateLimit ←─────────────── handler
//! ```

use std::fmt;
use std::sync::Arc;

use axum::{middleware, Router};
use thiserror::Error;

use crate::config::BodyConfig;
use crate::http::body::body_parser_middleware;
use crate::security::headers::{security_headers_middleware, SecurityHeaders};
use crate::security::rate_limit::{rate_limit_middleware, RateLimitState};
use crate::security::reporting::{reporting_middleware, ReportingHeaders};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SecurityHeaders,
    Reporting,
    RateLimit,
    BodyParser,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SecurityHeaders => "security_headers",
            Stage::Reporting => "reporting",
            Stage::RateLimit => "rate_limit",
            Stage::BodyParser => "body_parser",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("stage {0} listed more than once")]
    Duplicate(Stage),

    #[error("stage {first} must come after {then}")]
    OutOfOrder { first: Stage, then: Stage },
}

/// Everything the stages need at request time.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub security_headers: Arc<SecurityHeaders>,
    pub reporting: Arc<ReportingHeaders>,
    pub rate_limit: RateLimitState,
    pub body: Arc<BodyConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// `SecurityHeaders → Reporting → RateLimit → BodyParser`.
    pub fn standard() -> Self {
        Self {
            stages: vec![
                Stage::SecurityHeaders,
                Stage::Reporting,
                Stage::RateLimit,
                Stage::BodyParser,
            ],
        }
    }

    pub fn new(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        let pipeline = Self { stages };
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].contains(stage) {
                return Err(PipelineError::Duplicate(*stage));
            }
        }

        let pos = |stage: Stage| self.stages.iter().position(|s| *s == stage);
        if let (Some(limit), Some(body)) = (pos(Stage::RateLimit), pos(Stage::BodyParser)) {
            if body < limit {
                return Err(PipelineError::OutOfOrder {
                    first: Stage::BodyParser,
                    then: Stage::RateLimit,
                });
            }
        }
        if let (Some(limit), Some(headers)) = (pos(Stage::RateLimit), pos(Stage::SecurityHeaders)) {
            if headers > limit {
                return Err(PipelineError::OutOfOrder {
                    first: Stage::RateLimit,
                    then: Stage::SecurityHeaders,
                });
            }
        }
        Ok(())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wrap `router` in every stage. The last `.layer()` call is outermost,
    /// so stages are added in reverse.
    pub fn apply(&self, router: Router, ctx: &StageContext) -> Router {
        self.stages.iter().rev().fold(router, |router, stage| match stage {
            Stage::SecurityHeaders => router.layer(middleware::from_fn_with_state(
                ctx.security_headers.clone(),
                security_headers_middleware,
            )),
            Stage::Reporting => router.layer(middleware::from_fn_with_state(
                ctx.reporting.clone(),
                reporting_middleware,
            )),
            Stage::RateLimit => router.layer(middleware::from_fn_with_state(
                ctx.rate_limit.clone(),
                rate_limit_middleware,
            )),
            Stage::BodyParser => router.layer(middleware::from_fn_with_state(
                ctx.body.clone(),
                body_parser_middleware,
            )),
        })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}
