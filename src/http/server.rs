//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build every stage from configuration (fail before binding)
//! - Create the Axum router: report sink plus a 404 fallback
//! - Wire the pipeline, then timeout, request ID and tracing layers
//! - Run the sweeper next to the listener and stop both on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::validation::validate_config;
use crate::config::{ConfigError, ShieldConfig};
use crate::http::pipeline::{Pipeline, StageContext};
use crate::http::request::{request_id, UuidRequestId};
use crate::security::client_key;
use crate::security::headers::SecurityHeaders;
use crate::security::rate_limit::{spawn_sweeper, RateLimitState, RateLimiter};
use crate::security::reporting::{report_sink, ReportingHeaders};

/// HTTP server fronted by the security pipeline.
pub struct HttpServer {
    router: Router,
    config: ShieldConfig,
    limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a server with an in-memory limiter on the wall clock.
    pub fn new(config: ShieldConfig) -> Result<Self, ConfigError> {
        let limiter = Arc::new(RateLimiter::in_memory(config.rate_limit.clone())?);
        Self::with_limiter(config, limiter)
    }

    /// Create a server around an existing limiter (custom store or clock).
    pub fn with_limiter(config: ShieldConfig, limiter: Arc<RateLimiter>) -> Result<Self, ConfigError> {
        Self::with_pipeline(config, limiter, Pipeline::standard())
    }

    /// Create a server running `pipeline` in front of the handlers.
    ///
    /// The configuration and the stage order are both validated here, so a
    /// server that exists is one that can serve.
    pub fn with_pipeline(
        config: ShieldConfig,
        limiter: Arc<RateLimiter>,
        pipeline: Pipeline,
    ) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        pipeline.validate()?;

        let ctx = StageContext {
            security_headers: Arc::new(SecurityHeaders::from_config(&config.headers)?),
            reporting: Arc::new(ReportingHeaders::from_config(&config.reporting)?),
            rate_limit: RateLimitState::new(
                limiter.clone(),
                client_key::from_config(limiter.config()),
            ),
            body: Arc::new(config.body.clone()),
        };
        let router = Self::build_router(&config, &pipeline, &ctx);
        Ok(Self {
            router,
            config,
            limiter,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ShieldConfig, pipeline: &Pipeline, ctx: &StageContext) -> Router {
        let mut router = Router::new();
        if config.reporting.sink_enabled {
            router = router.route(&config.reporting.sink_path, post(report_sink));
        }
        let router = router.fallback(not_found);

        pipeline.apply(router, ctx).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id(request),
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            window_ms = self.limiter.config().window_ms,
            max_requests = self.limiter.config().max_requests,
            "HTTP server starting"
        );

        let sweeper = self
            .limiter
            .config()
            .enabled
            .then(|| spawn_sweeper(self.limiter.clone(), shutdown.resubscribe()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
