//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (window and quota > 0, timeouts > 0)
//! - Check references (NEL group exists, report URLs parse)
//! - Detect combinations that cannot work (report sink without body parser)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShieldConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{KeySource, RateLimitConfig, ReportingConfig, SecurityHeadersConfig, ShieldConfig};
use crate::security::reporting::REPORT_MEDIA_TYPES;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a whole configuration, collecting every error.
pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address().parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.host",
            format!("'{}' is not an IP address", config.listener.host),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    errors.extend(validate_rate_limit(&config.rate_limit));
    errors.extend(validate_headers(&config.headers));
    errors.extend(validate_reporting(&config.reporting));

    if config.body.enabled && config.body.max_bytes == 0 {
        errors.push(ValidationError::new("body.max_bytes", "must be greater than 0"));
    }

    if config.reporting.sink_enabled {
        if !config.body.enabled {
            errors.push(ValidationError::new(
                "reporting.sink_enabled",
                "the report sink needs the body parser (body.enabled = true)",
            ));
        } else {
            for media_type in REPORT_MEDIA_TYPES {
                let decoded = config
                    .body
                    .json_types
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(media_type));
                if !decoded {
                    errors.push(ValidationError::new(
                        "body.json_types",
                        format!("'{}' must be decoded as JSON for the report sink", media_type),
                    ));
                }
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the rate limiter section on its own.
///
/// Also used by `RateLimiter::new`, so a limiter built outside the loader is
/// held to the same rules.
pub fn validate_rate_limit(config: &RateLimitConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.window_ms == 0 {
        errors.push(ValidationError::new("rate_limit.window_ms", "must be greater than 0"));
    }
    if config.max_requests == 0 {
        errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
    }
    if config.sweep_interval_ms == Some(0) {
        errors.push(ValidationError::new(
            "rate_limit.sweep_interval_ms",
            "must be greater than 0",
        ));
    }
    if config.key_source == KeySource::ForwardedFor && config.trusted_proxies.is_empty() {
        errors.push(ValidationError::new(
            "rate_limit.trusted_proxies",
            "forwarded_for keys need at least one trusted proxy",
        ));
    }

    errors
}

fn validate_headers(config: &SecurityHeadersConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let csp = &config.content_security_policy;

    if csp.enabled {
        if csp.directives.is_empty() {
            errors.push(ValidationError::new(
                "headers.content_security_policy.directives",
                "at least one directive is required",
            ));
        }
        for (i, directive) in csp.directives.iter().enumerate() {
            let valid_name = !directive.name.is_empty()
                && directive
                    .name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '-');
            if !valid_name {
                errors.push(ValidationError::new(
                    format!("headers.content_security_policy.directives[{}].name", i),
                    format!("'{}' is not a directive name", directive.name),
                ));
            }
            if directive.values.iter().any(|v| v.contains(';') || v.contains(',')) {
                errors.push(ValidationError::new(
                    format!("headers.content_security_policy.directives[{}].values", i),
                    "source expressions must not contain ';' or ','",
                ));
            }
        }
    }

    if config.hsts.enabled && config.hsts.preload && (!config.hsts.include_sub_domains || config.hsts.max_age < 31_536_000) {
        errors.push(ValidationError::new(
            "headers.hsts.preload",
            "preload requires include_sub_domains and max_age of at least one year",
        ));
    }

    errors
}

fn validate_reporting(config: &ReportingConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.enabled {
        for (i, group) in config.groups.iter().enumerate() {
            if group.group.is_empty() {
                errors.push(ValidationError::new(
                    format!("reporting.groups[{}].group", i),
                    "group name must not be empty",
                ));
            }
            if group.endpoints.is_empty() {
                errors.push(ValidationError::new(
                    format!("reporting.groups[{}].endpoints", i),
                    "at least one endpoint is required",
                ));
            }
            for (j, endpoint) in group.endpoints.iter().enumerate() {
                if let Err(e) = Url::parse(&endpoint.url) {
                    errors.push(ValidationError::new(
                        format!("reporting.groups[{}].endpoints[{}].url", i, j),
                        format!("'{}': {}", endpoint.url, e),
                    ));
                }
            }
        }

        if config.nel.enabled && !config.groups.iter().any(|g| g.group == config.nel.report_to) {
            errors.push(ValidationError::new(
                "reporting.nel.report_to",
                format!("no reporting group named '{}'", config.nel.report_to),
            ));
        }
    }

    if config.sink_enabled && !config.sink_path.starts_with('/') {
        errors.push(ValidationError::new(
            "reporting.sink_path",
            "must start with '/'",
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CspDirective;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ShieldConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ShieldConfig::default();
        config.rate_limit.window_ms = 0;
        config.rate_limit.max_requests = 0;
        config.timeouts.request_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["timeouts.request_secs", "rate_limit.window_ms", "rate_limit.max_requests"]
        );
    }

    #[test]
    fn test_forwarded_for_requires_trusted_proxy() {
        let mut config = RateLimitConfig::default();
        config.key_source = KeySource::ForwardedFor;
        assert_eq!(validate_rate_limit(&config).len(), 1);

        config.trusted_proxies.push("10.0.0.1".parse().unwrap());
        assert!(validate_rate_limit(&config).is_empty());
    }

    #[test]
    fn test_nel_must_reference_a_group() {
        let mut config = ShieldConfig::default();
        config.reporting.nel.report_to = "missing".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "reporting.nel.report_to");
    }

    #[test]
    fn test_bad_report_url_and_directive() {
        let mut config = ShieldConfig::default();
        config.reporting.groups[0].endpoints[0].url = "not a url".to_string();
        config
            .headers
            .content_security_policy
            .directives
            .push(CspDirective::new("Script Src", &["'self'"]));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.field.ends_with(".url")));
        assert!(errors.iter().any(|e| e.field.ends_with(".name")));
    }

    #[test]
    fn test_sink_requires_body_parser() {
        let mut config = ShieldConfig::default();
        config.body.enabled = false;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "reporting.sink_enabled");

        config.reporting.sink_enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_sink_requires_report_types_decoded() {
        let mut config = ShieldConfig::default();
        config.body.json_types = vec!["application/json".to_string()];
        let errors = validate_config(&config).unwrap_err();
        let messages: Vec<_> = errors
            .iter()
            .filter(|e| e.field == "body.json_types")
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("application/csp-report"));
        assert!(messages[1].contains("application/reports+json"));

        config.body.json_types.push("Application/CSP-Report".to_string());
        config.body.json_types.push("application/reports+json".to_string());
        assert!(validate_config(&config).is_ok());

        config.body.json_types.truncate(1);
        config.reporting.sink_enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_host() {
        let mut config = ShieldConfig::default();
        config.listener.host = "localhost".to_string();
        assert!(validate_config(&config).is_err());
    }
}
