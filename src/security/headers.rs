//! Security response headers.
//!
//! # Responsibilities
//! - Render the configured policies (CSP, HSTS, Expect-CT, cross-origin
//!   policies, frame options, ...) into header values once at startup
//! - Stamp the same set on every response, including rejections made by
//!   later stages
//! - Strip `X-Powered-By`
//!
//! # Design Decisions
//! - Values are validated when the annotator is built; a value that is not a
//!   legal header is a startup error, never a per-request one
//! - The annotator overwrites headers set downstream so the policy is uniform

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::schema::{CspConfig, ExpectCtConfig, HstsConfig};
use crate::config::{ConfigError, SecurityHeadersConfig};

const CROSS_ORIGIN_EMBEDDER_POLICY: HeaderName = HeaderName::from_static("cross-origin-embedder-policy");
const CROSS_ORIGIN_OPENER_POLICY: HeaderName = HeaderName::from_static("cross-origin-opener-policy");
const CROSS_ORIGIN_RESOURCE_POLICY: HeaderName = HeaderName::from_static("cross-origin-resource-policy");
const EXPECT_CT: HeaderName = HeaderName::from_static("expect-ct");
const ORIGIN_AGENT_CLUSTER: HeaderName = HeaderName::from_static("origin-agent-cluster");
const X_DOWNLOAD_OPTIONS: HeaderName = HeaderName::from_static("x-download-options");
const X_PERMITTED_CROSS_DOMAIN_POLICIES: HeaderName =
    HeaderName::from_static("x-permitted-cross-domain-policies");
const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

/// Pre-rendered security headers.
#[derive(Debug, Clone, Default)]
pub struct SecurityHeaders {
    headers: HeaderMap,
    hide_powered_by: bool,
}

impl SecurityHeaders {
    /// Render every enabled header. Fails on values that are not legal header text.
    pub fn from_config(config: &SecurityHeadersConfig) -> Result<Self, ConfigError> {
        if !config.enabled {
            return Ok(Self::default());
        }
        let mut headers = HeaderMap::new();

        let csp = &config.content_security_policy;
        if csp.enabled {
            let name = if csp.report_only {
                header::CONTENT_SECURITY_POLICY_REPORT_ONLY
            } else {
                header::CONTENT_SECURITY_POLICY
            };
            headers.insert(name, header_value("content-security-policy", render_csp(csp))?);
        }

        let simple = [
            (CROSS_ORIGIN_EMBEDDER_POLICY, "cross-origin-embedder-policy", &config.cross_origin_embedder_policy),
            (CROSS_ORIGIN_OPENER_POLICY, "cross-origin-opener-policy", &config.cross_origin_opener_policy),
            (CROSS_ORIGIN_RESOURCE_POLICY, "cross-origin-resource-policy", &config.cross_origin_resource_policy),
            (header::X_DNS_PREFETCH_CONTROL, "x-dns-prefetch-control", &config.dns_prefetch_control),
            (header::X_FRAME_OPTIONS, "x-frame-options", &config.frame_options),
            (
                X_PERMITTED_CROSS_DOMAIN_POLICIES,
                "x-permitted-cross-domain-policies",
                &config.permitted_cross_domain_policies,
            ),
            (header::REFERRER_POLICY, "referrer-policy", &config.referrer_policy),
        ];
        for (name, label, value) in simple {
            if !value.is_empty() {
                headers.insert(name, header_value(label, value.clone())?);
            }
        }

        if config.expect_ct.enabled {
            headers.insert(EXPECT_CT, header_value("expect-ct", render_expect_ct(&config.expect_ct))?);
        }
        if config.hsts.enabled {
            headers.insert(
                header::STRICT_TRANSPORT_SECURITY,
                header_value("strict-transport-security", render_hsts(&config.hsts))?,
            );
        }
        if config.ie_no_open {
            headers.insert(X_DOWNLOAD_OPTIONS, HeaderValue::from_static("noopen"));
        }
        if config.no_sniff {
            headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        }
        if config.origin_agent_cluster {
            headers.insert(ORIGIN_AGENT_CLUSTER, HeaderValue::from_static("?1"));
        }
        if config.xss_filter {
            headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("0"));
        }

        tracing::debug!(count = headers.len(), "Security headers rendered");
        Ok(Self {
            headers,
            hide_powered_by: config.hide_powered_by,
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Stamp the headers onto a response header map.
    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in self.headers.iter() {
            target.insert(name.clone(), value.clone());
        }
        if self.hide_powered_by {
            target.remove(X_POWERED_BY);
        }
    }
}

fn header_value(name: &'static str, value: String) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(&value).map_err(|e| ConfigError::Header {
        name,
        reason: e.to_string(),
    })
}

/// `default-src 'self';block-all-mixed-content;...;report-uri https://...`
pub fn render_csp(csp: &CspConfig) -> String {
    let mut parts: Vec<String> = csp
        .directives
        .iter()
        .map(|d| {
            if d.values.is_empty() {
                d.name.clone()
            } else {
                format!("{} {}", d.name, d.values.join(" "))
            }
        })
        .collect();
    if !csp.report_uri.is_empty() {
        parts.push(format!("report-uri {}", csp.report_uri));
    }
    parts.join(";")
}

fn render_expect_ct(config: &ExpectCtConfig) -> String {
    let mut value = format!("max-age={}", config.max_age);
    if config.enforce {
        value.push_str(", enforce");
    }
    if !config.report_uri.is_empty() {
        value.push_str(&format!(", report-uri=\"{}\"", config.report_uri));
    }
    value
}

fn render_hsts(config: &HstsConfig) -> String {
    let mut value = format!("max-age={}", config.max_age);
    if config.include_sub_domains {
        value.push_str("; includeSubDomains");
    }
    if config.preload {
        value.push_str("; preload");
    }
    value
}

/// Middleware stamping security headers on every response.
pub async fn security_headers_middleware(
    State(headers): State<Arc<SecurityHeaders>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    headers.apply(response.headers_mut());
    response
}
