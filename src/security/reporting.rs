//! Reporting API support.
//!
//! # Responsibilities
//! - Render `Report-To` and `NEL` headers from the configured groups
//! - Accept violation reports posted by browsers at the sink path
//!
//! # Data Flow
//! ```text
//! response → reporting_middleware (Report-To, NEL) → client
//! browser  → POST /reports → body parser → report_sink → log + metric → 204
//! ```

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use serde_json::Value;

use crate::config::{ConfigError, ReportingConfig};
use crate::http::body::{media_type, ParsedBody};
use crate::observability::metrics;

pub const REPORT_TO: HeaderName = HeaderName::from_static("report-to");
pub const NEL: HeaderName = HeaderName::from_static("nel");

/// Media types the sink accepts.
pub const REPORT_MEDIA_TYPES: [&str; 3] = [
    "application/json",
    "application/csp-report",
    "application/reports+json",
];

/// Pre-rendered reporting headers.
#[derive(Debug, Clone, Default)]
pub struct ReportingHeaders {
    report_to: Option<HeaderValue>,
    nel: Option<HeaderValue>,
}

impl ReportingHeaders {
    pub fn from_config(config: &ReportingConfig) -> Result<Self, ConfigError> {
        if !config.enabled {
            return Ok(Self::default());
        }

        let report_to = if config.groups.is_empty() {
            None
        } else {
            let groups = config
                .groups
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| header_error("report-to", e))?;
            Some(to_header_value("report-to", groups.join(", "))?)
        };

        let nel = if config.nel.enabled {
            let rendered =
                serde_json::to_string(&config.nel).map_err(|e| header_error("nel", e))?;
            Some(to_header_value("nel", rendered)?)
        } else {
            None
        };

        Ok(Self { report_to, nel })
    }

    pub fn report_to(&self) -> Option<&HeaderValue> {
        self.report_to.as_ref()
    }

    pub fn nel(&self) -> Option<&HeaderValue> {
        self.nel.as_ref()
    }

    pub fn apply(&self, target: &mut HeaderMap) {
        if let Some(value) = &self.report_to {
            target.insert(REPORT_TO, value.clone());
        }
        if let Some(value) = &self.nel {
            target.insert(NEL, value.clone());
        }
    }
}

fn header_error(name: &'static str, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Header {
        name,
        reason: err.to_string(),
    }
}

fn to_header_value(name: &'static str, value: String) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(&value).map_err(|e| header_error(name, e))
}

/// Middleware adding `Report-To` and `NEL` to every response.
pub async fn reporting_middleware(
    State(headers): State<Arc<ReportingHeaders>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    headers.apply(response.headers_mut());
    response
}

/// Report types found in a payload.
///
/// `{"csp-report": {...}}` is a legacy CSP report; an array is a Reporting
/// API batch where each entry names its own `type`.
pub fn report_types(payload: &Value) -> Vec<String> {
    match payload {
        Value::Object(map) if map.contains_key("csp-report") => vec!["csp-violation".to_string()],
        Value::Object(map) => vec![type_of(map.get("type"))],
        Value::Array(entries) => entries
            .iter()
            .map(|entry| type_of(entry.get("type")))
            .collect(),
        _ => vec!["unknown".to_string()],
    }
}

fn type_of(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Sink for browser violation reports.
pub async fn report_sink(
    headers: HeaderMap,
    body: Option<Extension<ParsedBody>>,
) -> Response {
    let accepted = media_type(&headers)
        .map(|t| REPORT_MEDIA_TYPES.contains(&t.as_str()))
        .unwrap_or(false);
    if !accepted {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported report media type").into_response();
    }

    let Some(Extension(ParsedBody::Json(payload))) = body else {
        return (StatusCode::BAD_REQUEST, "Expected a JSON report").into_response();
    };

    for report_type in report_types(&payload) {
        tracing::info!(report_type = %report_type, report = %payload, "Violation report received");
        metrics::record_report(&report_type);
    }
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ReportEndpoint, ReportGroup};
    use serde_json::json;

    #[test]
    fn test_default_headers() {
        let headers = ReportingHeaders::from_config(&ReportingConfig::default()).unwrap();
        assert_eq!(
            headers.report_to().unwrap(),
            r#"{"group":"default","max_age":31536000,"include_subdomains":true,"endpoints":[{"url":"https://report-uri.com","priority":1}]}"#
        );
        assert_eq!(
            headers.nel().unwrap(),
            r#"{"report_to":"default","max_age":31536000,"include_subdomains":true}"#
        );
    }

    #[test]
    fn test_groups_are_comma_joined() {
        let mut config = ReportingConfig::default();
        config.groups.push(ReportGroup {
            group: "csp".to_string(),
            max_age: 60,
            include_subdomains: false,
            endpoints: vec![ReportEndpoint {
                url: "https://example.com/csp".to_string(),
                priority: 2,
            }],
        });
        let headers = ReportingHeaders::from_config(&config).unwrap();
        let value = headers.report_to().unwrap().to_str().unwrap();
        assert!(value.contains("}]}, {\"group\":\"csp\""));
    }

    #[test]
    fn test_disabled_emits_nothing() {
        let config = ReportingConfig {
            enabled: false,
            ..ReportingConfig::default()
        };
        let headers = ReportingHeaders::from_config(&config).unwrap();
        let mut target = HeaderMap::new();
        headers.apply(&mut target);
        assert!(target.is_empty());
    }

    #[test]
    fn test_nel_can_be_disabled_alone() {
        let mut config = ReportingConfig::default();
        config.nel.enabled = false;
        let headers = ReportingHeaders::from_config(&config).unwrap();
        assert!(headers.report_to().is_some());
        assert!(headers.nel().is_none());
    }

    #[test]
    fn test_report_types() {
        assert_eq!(
            report_types(&json!({"csp-report": {"violated-directive": "script-src"}})),
            vec!["csp-violation"]
        );
        assert_eq!(
            report_types(&json!([{"type": "network-error"}, {"type": "deprecation"}, {}])),
            vec!["network-error", "deprecation", "unknown"]
        );
        assert_eq!(report_types(&json!({"type": "intervention"})), vec!["intervention"]);
        assert_eq!(report_types(&json!(7)), vec!["unknown"]);
    }
}
