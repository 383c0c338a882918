//! Request body decoding.
//!
//! # Responsibilities
//! - Buffer bodies up to `body.max_bytes`, answering 413 above it
//! - Decode JSON media types and url-encoded forms into [`ParsedBody`]
//! - Attach the decoded value to request extensions for handlers
//!
//! # Design Decisions
//! - Runs after the rate limiter, so rejected requests are never read
//! - Unknown media types and empty bodies pass through untouched
//! - The raw bytes are put back, so handlers may still read the body

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use serde_json::Value;
use thiserror::Error;

use crate::config::BodyConfig;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Decoded request body, stored in request extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// Body decoding failures.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Unreadable(#[source] axum::Error),

    #[error("malformed JSON body: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

impl BodyError {
    /// Classify a failed buffered read.
    pub fn from_read(err: axum::Error, limit: usize) -> Self {
        if is_length_limit(&err) {
            BodyError::TooLarge { limit }
        } else {
            BodyError::Unreadable(err)
        }
    }
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

impl IntoResponse for BodyError {
    fn into_response(self) -> Response {
        let status = match self {
            BodyError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::Unreadable(_) | BodyError::MalformedJson(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Lower-cased media type of the request, without parameters.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}

/// Decode `bytes` according to `media_type`. `Ok(None)` means "not ours".
pub fn decode(
    config: &BodyConfig,
    media_type: &str,
    bytes: &[u8],
) -> Result<Option<ParsedBody>, BodyError> {
    if config.json_types.iter().any(|t| t.eq_ignore_ascii_case(media_type)) {
        let value = serde_json::from_slice(bytes)?;
        return Ok(Some(ParsedBody::Json(value)));
    }
    if config.urlencoded && media_type == FORM_URLENCODED {
        let pairs = url::form_urlencoded::parse(bytes).into_owned().collect();
        return Ok(Some(ParsedBody::Form(pairs)));
    }
    Ok(None)
}

fn is_decodable(config: &BodyConfig, media_type: &str) -> bool {
    config.json_types.iter().any(|t| t.eq_ignore_ascii_case(media_type))
        || (config.urlencoded && media_type == FORM_URLENCODED)
}

/// Middleware decoding request bodies.
pub async fn body_parser_middleware(
    State(config): State<Arc<BodyConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !config.enabled {
        return next.run(request).await;
    }
    let Some(media_type) = media_type(request.headers()) else {
        return next.run(request).await;
    };
    if !is_decodable(&config, &media_type) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, config.max_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = BodyError::from_read(e, config.max_bytes);
            tracing::warn!(error = %err, limit = config.max_bytes, "Request body rejected");
            return err.into_response();
        }
    };

    let parsed = if bytes.is_empty() {
        None
    } else {
        match decode(&config, &media_type, &bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, media_type = %media_type, "Body decoding failed");
                return e.into_response();
            }
        }
    };

    let mut request = Request::from_parts(parts, Body::from(bytes));
    if let Some(parsed) = parsed {
        request.extensions_mut().insert(parsed);
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_media_type_strips_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("Application/JSON; charset=utf-8"),
        );
        assert_eq!(media_type(&headers).as_deref(), Some("application/json"));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(" ; x=y"));
        assert_eq!(media_type(&headers), None);
    }

    #[test]
    fn test_decode_json_types() {
        let config = BodyConfig::default();
        let parsed = decode(&config, "application/csp-report", br#"{"csp-report":{}}"#).unwrap();
        assert_eq!(
            parsed,
            Some(ParsedBody::Json(serde_json::json!({"csp-report": {}})))
        );
    }

    #[test]
    fn test_decode_form_is_flat() {
        let config = BodyConfig::default();
        let parsed = decode(&config, FORM_URLENCODED, b"a=1&b=two+words&a[x]=3").unwrap();
        assert_eq!(
            parsed,
            Some(ParsedBody::Form(vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string()),
                ("a[x]".to_string(), "3".to_string()),
            ]))
        );
    }

    #[test]
    fn test_decode_form_disabled() {
        let config = BodyConfig {
            urlencoded: false,
            ..BodyConfig::default()
        };
        assert_eq!(decode(&config, FORM_URLENCODED, b"a=1").unwrap(), None);
    }

    #[test]
    fn test_decode_other_types_pass_through() {
        let config = BodyConfig::default();
        assert_eq!(decode(&config, "text/plain", b"{").unwrap(), None);
    }

    #[test]
    fn test_malformed_json_is_bad_request() {
        let config = BodyConfig::default();
        let err = decode(&config, "application/json", b"{not json").unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_limit_overflow_is_too_large() {
        let err = axum::body::to_bytes(Body::from("x".repeat(32)), 8)
            .await
            .unwrap_err();
        let err = BodyError::from_read(err, 8);
        assert!(matches!(err, BodyError::TooLarge { limit: 8 }));
        assert_eq!(err.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_transport_failure_is_bad_request() {
        let err = axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        let err = BodyError::from_read(err, 8);
        assert!(matches!(err, BodyError::Unreadable(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_too_large_status() {
        let response = BodyError::TooLarge { limit: 10 }.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
