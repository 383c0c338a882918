//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use edge_shield::config::ShieldConfig;
use edge_shield::http::{HttpServer, Pipeline};
use edge_shield::lifecycle::Shutdown;
use edge_shield::security::{ManualClock, MemoryStore, RateLimiter};
use tokio::net::TcpListener;

/// Start of a 60 s window, so the default quota resets 60 s later.
pub const START_MS: u64 = 120_000;

/// A running server on an ephemeral port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub clock: ManualClock,
    pub limiter: Arc<RateLimiter>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a server whose limiter runs on a manual clock set to [`START_MS`].
pub async fn spawn_server(config: ShieldConfig) -> TestServer {
    spawn_server_with(config, Pipeline::standard()).await
}

/// [`spawn_server`] with a custom stage order.
pub async fn spawn_server_with(config: ShieldConfig, pipeline: Pipeline) -> TestServer {
    let clock = ManualClock::new(START_MS);
    let limiter = Arc::new(
        RateLimiter::new(
            config.rate_limit.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
        )
        .unwrap(),
    );
    let server = HttpServer::with_pipeline(config, limiter.clone(), pipeline).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer {
        addr,
        shutdown,
        clock,
        limiter,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
