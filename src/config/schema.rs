//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shield.
//! All types derive Serde traits for deserialization from config files, and
//! every section carries defaults so an empty file is a valid configuration.
//!
//! String-valued header settings use the empty string to mean "do not emit".

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Root configuration for the shield server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShieldConfig {
    /// Listener configuration (host, port).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Static security response headers.
    pub headers: SecurityHeadersConfig,

    /// Reporting API headers and the report sink.
    pub reporting: ReportingConfig,

    /// Request body decoding.
    pub body: BodyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// TCP port. Overridable through the `PORT` environment variable.
    pub port: u16,
}

impl ListenerConfig {
    /// The `host:port` string handed to the TCP listener.
    pub fn bind_address(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Counting algorithm used by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Non-overlapping windows; allows up to `2 × max` across a boundary.
    #[default]
    FixedWindow,
    /// Fixed windows with the previous window's count weighted in.
    SlidingWindow,
}

/// Where the client key is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Peer socket address of the TCP connection.
    #[default]
    PeerIp,
    /// `X-Forwarded-For` / `X-Real-IP`, honoured only from trusted proxies.
    ForwardedFor,
}

/// Behaviour when the window store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Admit the request unmetered.
    #[default]
    Open,
    /// Reject the request with 503.
    Closed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Maximum requests per client per window.
    pub max_requests: u64,

    /// Counting algorithm.
    pub algorithm: RateLimitAlgorithm,

    /// Client key source.
    pub key_source: KeySource,

    /// Proxies whose forwarding headers are trusted (`forwarded_for` only).
    pub trusted_proxies: Vec<IpAddr>,

    /// Behaviour when the window store fails.
    pub store_failure: StoreFailurePolicy,

    /// Interval between stale record sweeps. Defaults to `window_ms`.
    pub sweep_interval_ms: Option<u64>,

    /// Emit `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset`.
    pub legacy_headers: bool,

    /// Emit `RateLimit-Limit`, `RateLimit-Remaining`, `RateLimit-Reset`.
    pub standard_headers: bool,

    /// Body of the 429 response.
    pub message: String,
}

impl RateLimitConfig {
    pub fn sweep_interval_ms(&self) -> u64 {
        self.sweep_interval_ms.unwrap_or(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            max_requests: 40,
            algorithm: RateLimitAlgorithm::default(),
            key_source: KeySource::default(),
            trusted_proxies: Vec::new(),
            store_failure: StoreFailurePolicy::default(),
            sweep_interval_ms: None,
            legacy_headers: true,
            standard_headers: false,
            message: "Too many requests, please try again later.".to_string(),
        }
    }
}

/// A single CSP directive. An empty value list renders the bare name.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CspDirective {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl CspDirective {
    pub fn new(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Content-Security-Policy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CspConfig {
    pub enabled: bool,

    /// Send `Content-Security-Policy-Report-Only` instead of enforcing.
    pub report_only: bool,

    /// Directives in emission order.
    pub directives: Vec<CspDirective>,

    /// Appended as a `report-uri` directive when non-empty.
    pub report_uri: String,
}

const SELF: &str = "'self'";

const TYPEKIT: [&str; 2] = ["https://p.typekit.net", "https://use.typekit.net"];

const SCRIPT_HOSTS: [&str; 10] = [
    "https://ajax.cloudflare.com",
    "https://static.cloudflareinsights.com",
    "https://www.google-analytics.com",
    "https://www.googleadservices.com",
    "https://www.google.com",
    "https://www.googleadservices.com",
    "https://googleads.g.doubleclick.net",
    "https://ssl.google-analytics.com",
    "https://tagmanager.google.com",
    "https://www.googletagmanager.com",
];

const STYLE_HOSTS: [&str; 4] = [
    "https://tagmanager.google.com",
    "https://fonts.googleapis.com",
    "https://p.typekit.net",
    "https://use.typekit.net",
];

fn with_self(hosts: &[&str]) -> Vec<String> {
    let mut values = vec![SELF.to_string()];
    for host in hosts {
        if !values.iter().any(|v| v == host) {
            values.push(host.to_string());
        }
    }
    values
}

fn directive(name: &str, values: Vec<String>) -> CspDirective {
    CspDirective {
        name: name.to_string(),
        values,
    }
}

impl Default for CspConfig {
    fn default() -> Self {
        let script = with_self(&SCRIPT_HOSTS);
        let style = with_self(&STYLE_HOSTS);
        let prefetch = with_self(&[&TYPEKIT[..], &SCRIPT_HOSTS[..]].concat());

        let directives = vec![
            CspDirective::new("default-src", &[SELF]),
            CspDirective::new("base-uri", &[SELF]),
            CspDirective::new("block-all-mixed-content", &[]),
            CspDirective::new("child-src", &[SELF]),
            directive(
                "connect-src",
                with_self(&[
                    "https://cloudflareinsights.com",
                    "https://www.google-analytics.com",
                    TYPEKIT[0],
                    TYPEKIT[1],
                ]),
            ),
            directive(
                "font-src",
                with_self(&["data:", "https://fonts.gstatic.com", TYPEKIT[0], TYPEKIT[1]]),
            ),
            CspDirective::new("frame-ancestors", &[SELF]),
            directive(
                "frame-src",
                with_self(&["https://bid.g.doubleclick.net", "https://www.google.com"]),
            ),
            directive(
                "img-src",
                with_self(&[
                    "data:",
                    "https://ssl.gstatic.com",
                    "https://www.gstatic.com",
                    "https://googleads.g.doubleclick.net",
                    "https://www.google.com",
                    "https://www.google-analytics.com",
                ]),
            ),
            CspDirective::new("manifest-src", &[SELF]),
            CspDirective::new("media-src", &[SELF]),
            CspDirective::new("object-src", &[SELF]),
            directive("prefetch-src", prefetch),
            directive("script-src", script.clone()),
            directive("script-src-elem", script.clone()),
            directive("script-src-attr", script),
            directive("style-src", style.clone()),
            directive("style-src-elem", style.clone()),
            directive("style-src-attr", style),
            CspDirective::new("upgrade-insecure-requests", &[]),
        ];

        Self {
            enabled: true,
            report_only: true,
            directives,
            report_uri: "https://report-uri.com/".to_string(),
        }
    }
}

/// Expect-CT settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpectCtConfig {
    pub enabled: bool,
    pub max_age: u64,
    pub enforce: bool,
    pub report_uri: String,
}

impl Default for ExpectCtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: 86_400,
            enforce: true,
            report_uri: "https://report-uri.com/".to_string(),
        }
    }
}

/// Strict-Transport-Security settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HstsConfig {
    pub enabled: bool,
    pub max_age: u64,
    pub include_sub_domains: bool,
    pub preload: bool,
}

impl Default for HstsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: 31_536_000,
            include_sub_domains: true,
            preload: true,
        }
    }
}

/// Static security headers stamped on every response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityHeadersConfig {
    /// Enable the header annotator stage.
    pub enabled: bool,

    pub content_security_policy: CspConfig,

    /// `Cross-Origin-Embedder-Policy` value.
    pub cross_origin_embedder_policy: String,

    /// `Cross-Origin-Opener-Policy` value.
    pub cross_origin_opener_policy: String,

    /// `Cross-Origin-Resource-Policy` value.
    pub cross_origin_resource_policy: String,

    /// `X-DNS-Prefetch-Control` value ("on" / "off").
    pub dns_prefetch_control: String,

    pub expect_ct: ExpectCtConfig,

    /// `X-Frame-Options` value.
    pub frame_options: String,

    pub hsts: HstsConfig,

    /// Emit `X-Download-Options: noopen`.
    pub ie_no_open: bool,

    /// Emit `X-Content-Type-Options: nosniff`.
    pub no_sniff: bool,

    /// Emit `Origin-Agent-Cluster: ?1`.
    pub origin_agent_cluster: bool,

    /// `X-Permitted-Cross-Domain-Policies` value.
    pub permitted_cross_domain_policies: String,

    /// `Referrer-Policy` value.
    pub referrer_policy: String,

    /// Emit `X-XSS-Protection: 0`.
    pub xss_filter: bool,

    /// Strip `X-Powered-By` from responses.
    pub hide_powered_by: bool,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            content_security_policy: CspConfig::default(),
            cross_origin_embedder_policy: "require-corp".to_string(),
            cross_origin_opener_policy: "same-origin".to_string(),
            cross_origin_resource_policy: "same-site".to_string(),
            dns_prefetch_control: "on".to_string(),
            expect_ct: ExpectCtConfig::default(),
            frame_options: "SAMEORIGIN".to_string(),
            hsts: HstsConfig::default(),
            ie_no_open: true,
            no_sniff: true,
            origin_agent_cluster: true,
            permitted_cross_domain_policies: "by-content-type".to_string(),
            referrer_policy: "no-referrer-when-downgrade".to_string(),
            xss_filter: true,
            hide_powered_by: true,
        }
    }
}

/// A Reporting API endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReportEndpoint {
    pub url: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

/// A Reporting API group, serialized verbatim into `Report-To`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReportGroup {
    pub group: String,
    pub max_age: u64,
    #[serde(default)]
    pub include_subdomains: bool,
    pub endpoints: Vec<ReportEndpoint>,
}

/// Network Error Logging policy, serialized verbatim into `NEL`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NelConfig {
    #[serde(skip_serializing)]
    pub enabled: bool,
    pub report_to: String,
    pub max_age: u64,
    pub include_subdomains: bool,
}

impl Default for NelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_to: "default".to_string(),
            max_age: 31_536_000,
            include_subdomains: true,
        }
    }
}

/// Reporting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Emit `Report-To` and `NEL` headers.
    pub enabled: bool,

    pub groups: Vec<ReportGroup>,

    pub nel: NelConfig,

    /// Mount the local report sink.
    pub sink_enabled: bool,

    /// Path of the local report sink.
    pub sink_path: String,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            groups: vec![ReportGroup {
                group: "default".to_string(),
                max_age: 31_536_000,
                include_subdomains: true,
                endpoints: vec![ReportEndpoint {
                    url: "https://report-uri.com".to_string(),
                    priority: 1,
                }],
            }],
            nel: NelConfig::default(),
            sink_enabled: true,
            sink_path: "/reports".to_string(),
        }
    }
}

/// Request body decoding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Enable the body parser stage.
    pub enabled: bool,

    /// Largest body accepted, in bytes.
    pub max_bytes: usize,

    /// Media types decoded as JSON.
    pub json_types: Vec<String>,

    /// Decode `application/x-www-form-urlencoded` bodies.
    pub urlencoded: bool,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: 100 * 1024,
            json_types: vec![
                "application/json".to_string(),
                "application/csp-report".to_string(),
                "application/reports+json".to_string(),
            ],
            urlencoded: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
