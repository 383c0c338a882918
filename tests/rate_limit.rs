//! Rate limiting over real HTTP connections.

use std::net::{IpAddr, Ipv4Addr};

use edge_shield::config::{KeySource, ShieldConfig};

mod common;

fn forwarded_config(max_requests: u64) -> ShieldConfig {
    let mut config = ShieldConfig::default();
    config.rate_limit.max_requests = max_requests;
    config.rate_limit.key_source = KeySource::ForwardedFor;
    config.rate_limit.trusted_proxies = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
    config
}

#[tokio::test]
async fn test_41st_request_in_window_is_rejected() {
    let server = common::spawn_server(ShieldConfig::default()).await;
    let client = common::client();

    for i in 1..=40u64 {
        let res = client.get(server.url("/page")).send().await.unwrap();
        assert_eq!(res.status(), 404, "request {} should pass the limiter", i);
        assert_eq!(res.headers()["x-ratelimit-limit"], "40");
        assert_eq!(
            res.headers()["x-ratelimit-remaining"],
            (40 - i).to_string().as_str()
        );
        assert_eq!(res.headers()["x-ratelimit-reset"], "180");
    }

    for _ in 0..2 {
        let res = client.get(server.url("/page")).send().await.unwrap();
        assert_eq!(res.status(), 429);
        assert_eq!(res.headers()["retry-after"], "60");
        assert_eq!(res.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(
            res.text().await.unwrap(),
            "Too many requests, please try again later."
        );
    }

    // Rejected attempts count, they do not extend the window.
    server.clock.advance(60_000);
    let res = client.get(server.url("/page")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.headers()["x-ratelimit-remaining"], "39");
}

#[tokio::test]
async fn test_retry_after_shrinks_with_the_window() {
    let mut config = ShieldConfig::default();
    config.rate_limit.max_requests = 1;
    let server = common::spawn_server(config).await;
    let client = common::client();

    assert_eq!(client.get(server.url("/")).send().await.unwrap().status(), 404);

    server.clock.advance(58_500);
    let res = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 429);
    assert_eq!(res.headers()["retry-after"], "2");

    server.clock.advance(1_499);
    let res = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(res.headers()["retry-after"], "1");

    server.clock.advance(1);
    assert_eq!(client.get(server.url("/")).send().await.unwrap().status(), 404);
}

#[tokio::test]
async fn test_concurrent_clients_are_counted_separately() {
    let server = common::spawn_server(forwarded_config(40)).await;
    let client = common::client();

    let mut handles = Vec::new();
    for ip in ["10.0.0.1", "10.0.0.2"] {
        for _ in 0..41 {
            let client = client.clone();
            let url = server.url("/");
            handles.push(tokio::spawn(async move {
                let res = client
                    .get(url)
                    .header("x-forwarded-for", ip)
                    .send()
                    .await
                    .unwrap();
                (ip, res.status().as_u16())
            }));
        }
    }

    let mut passed = std::collections::HashMap::new();
    let mut rejected = std::collections::HashMap::new();
    for handle in handles {
        let (ip, status) = handle.await.unwrap();
        match status {
            404 => *passed.entry(ip).or_insert(0) += 1,
            429 => *rejected.entry(ip).or_insert(0) += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    for ip in ["10.0.0.1", "10.0.0.2"] {
        assert_eq!(passed[ip], 40, "{} admitted", ip);
        assert_eq!(rejected[ip], 1, "{} rejected", ip);
    }
    assert_eq!(server.limiter.tracked_clients(), 2);
}

#[tokio::test]
async fn test_forged_forwarded_for_prefix_shares_one_bucket() {
    let server = common::spawn_server(forwarded_config(1)).await;
    let client = common::client();

    let mut statuses = Vec::new();
    for i in 0..5 {
        let res = client
            .get(server.url("/"))
            .header("x-forwarded-for", format!("10.9.9.{}, 198.51.100.7", i))
            .send()
            .await
            .unwrap();
        statuses.push(res.status().as_u16());
    }
    assert_eq!(statuses, vec![404, 429, 429, 429, 429]);

    let res = client
        .get(server.url("/"))
        .header("x-forwarded-for", "198.51.100.8")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(server.limiter.tracked_clients(), 2);
}

#[tokio::test]
async fn test_standard_headers_replace_legacy_ones() {
    let mut config = ShieldConfig::default();
    config.rate_limit.legacy_headers = false;
    config.rate_limit.standard_headers = true;
    let server = common::spawn_server(config).await;

    let res = common::client().get(server.url("/")).send().await.unwrap();
    assert!(res.headers().get("x-ratelimit-limit").is_none());
    assert_eq!(res.headers()["ratelimit-limit"], "40");
    assert_eq!(res.headers()["ratelimit-remaining"], "39");
    assert_eq!(res.headers()["ratelimit-reset"], "60");
}

#[tokio::test]
async fn test_disabled_limiter_admits_everything() {
    let mut config = ShieldConfig::default();
    config.rate_limit.enabled = false;
    config.rate_limit.max_requests = 1;
    let server = common::spawn_server(config).await;
    let client = common::client();

    for _ in 0..5 {
        let res = client.get(server.url("/")).send().await.unwrap();
        assert_eq!(res.status(), 404);
        assert!(res.headers().get("x-ratelimit-limit").is_none());
    }
    assert_eq!(server.limiter.tracked_clients(), 0);
}
