//! Client key extraction.
//!
//! The rate limiter buckets requests by a string key. Which part of the
//! request becomes the key is a strategy chosen at startup.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;

use crate::config::{KeySource, RateLimitConfig};

/// Bucket shared by requests no key can be derived for.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the client key from a request.
pub trait ClientKeyExtractor: Send + Sync + std::fmt::Debug {
    fn extract(&self, req: &Request<Body>) -> Option<String>;
}

fn peer_ip(req: &Request<Body>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Keys by the TCP peer address.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerIpExtractor;

impl ClientKeyExtractor for PeerIpExtractor {
    fn extract(&self, req: &Request<Body>) -> Option<String> {
        peer_ip(req).map(|ip| ip.to_string())
    }
}

/// Keys by the client address a trusted proxy reports.
///
/// `X-Forwarded-For` is read right to left: each proxy appends the address it
/// received from, so the first entry not in `trusted_proxies` is the client.
/// Entries left of it were written by the client and are ignored. Without
/// that header `X-Real-IP` is used. Headers from untrusted peers are ignored
/// and the peer address is used instead, so clients cannot pick their own
/// bucket.
#[derive(Debug, Clone)]
pub struct ForwardedForExtractor {
    trusted_proxies: Vec<IpAddr>,
}

impl ForwardedForExtractor {
    pub fn new(trusted_proxies: Vec<IpAddr>) -> Self {
        Self { trusted_proxies }
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.contains(ip)
    }

    /// Nearest untrusted hop in the chain; the furthest hop when every entry
    /// is a trusted proxy. Stops at the first unparsable entry.
    fn forwarded_for(&self, chain: &str) -> Option<IpAddr> {
        let mut furthest = None;
        for entry in chain.rsplit(',') {
            let Ok(ip) = entry.trim().parse::<IpAddr>() else {
                break;
            };
            if !self.is_trusted(&ip) {
                return Some(ip);
            }
            furthest = Some(ip);
        }
        furthest
    }

    fn forwarded_ip(&self, req: &Request<Body>) -> Option<IpAddr> {
        let headers = req.headers();
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|chain| self.forwarded_for(chain))
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok())
            })
    }
}

impl ClientKeyExtractor for ForwardedForExtractor {
    fn extract(&self, req: &Request<Body>) -> Option<String> {
        let peer = peer_ip(req);
        let trusted = peer.is_some_and(|ip| self.is_trusted(&ip));
        let ip = if trusted {
            self.forwarded_ip(req).or(peer)
        } else {
            peer
        };
        ip.map(|ip| ip.to_string())
    }
}

/// Build the extractor selected by configuration.
pub fn from_config(config: &RateLimitConfig) -> Arc<dyn ClientKeyExtractor> {
    match config.key_source {
        KeySource::PeerIp => Arc::new(PeerIpExtractor),
        KeySource::ForwardedFor => Arc::new(ForwardedForExtractor::new(config.trusted_proxies.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(peer: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    #[test]
    fn test_peer_ip() {
        let req = request("192.168.1.7:51000", &[]);
        assert_eq!(PeerIpExtractor.extract(&req).as_deref(), Some("192.168.1.7"));
    }

    #[test]
    fn test_peer_ip_missing_connect_info() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(PeerIpExtractor.extract(&req).is_none());
    }

    #[test]
    fn test_forwarded_for_from_trusted_proxy() {
        let extractor = ForwardedForExtractor::new(vec!["10.0.0.1".parse().unwrap()]);

        let req = request("10.0.0.1:443", &[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        assert_eq!(extractor.extract(&req).as_deref(), Some("203.0.113.9"));

        let req = request("10.0.0.1:443", &[("x-real-ip", "203.0.113.10")]);
        assert_eq!(extractor.extract(&req).as_deref(), Some("203.0.113.10"));

        let req = request("10.0.0.1:443", &[("x-forwarded-for", "garbage")]);
        assert_eq!(extractor.extract(&req).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_forwarded_for_ignored_from_untrusted_peer() {
        let extractor = ForwardedForExtractor::new(vec!["10.0.0.1".parse().unwrap()]);
        let req = request("198.51.100.4:5555", &[("x-forwarded-for", "203.0.113.9")]);
        assert_eq!(extractor.extract(&req).as_deref(), Some("198.51.100.4"));
    }

    #[test]
    fn test_forged_leading_entries_are_ignored() {
        let extractor = ForwardedForExtractor::new(vec!["10.0.0.1".parse().unwrap()]);
        for forged in ["1.2.3.4", "10.9.9.9", "::1"] {
            let chain = format!("{}, 203.0.113.9", forged);
            let req = request("10.0.0.1:443", &[("x-forwarded-for", chain.as_str())]);
            assert_eq!(extractor.extract(&req).as_deref(), Some("203.0.113.9"));
        }
    }

    #[test]
    fn test_chain_of_trusted_proxies() {
        let extractor = ForwardedForExtractor::new(vec![
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
        ]);

        let req = request(
            "10.0.0.1:443",
            &[("x-forwarded-for", "6.6.6.6, 203.0.113.9, 10.0.0.2")],
        );
        assert_eq!(extractor.extract(&req).as_deref(), Some("203.0.113.9"));

        let req = request("10.0.0.1:443", &[("x-forwarded-for", "10.0.0.2")]);
        assert_eq!(extractor.extract(&req).as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_unparsable_hop_stops_the_walk() {
        let extractor = ForwardedForExtractor::new(vec!["10.0.0.1".parse().unwrap()]);
        let req = request(
            "10.0.0.1:443",
            &[("x-forwarded-for", "203.0.113.9, bogus"), ("x-real-ip", "203.0.113.10")],
        );
        assert_eq!(extractor.extract(&req).as_deref(), Some("203.0.113.10"));
    }
}
