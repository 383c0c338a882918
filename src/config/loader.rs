//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ShieldConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::http::pipeline::PipelineError;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "EDGE_SHIELD_CONFIG";

/// Error type for configuration loading. Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {var}={value:?} is not valid")]
    Env { var: &'static str, value: String },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("header {name} cannot carry the configured value: {reason}")]
    Header { name: &'static str, reason: String },

    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_file(path: &Path) -> Result<ShieldConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Load the effective configuration: file (if any), then environment overrides,
/// then validation.
pub fn load(path: Option<&Path>) -> Result<ShieldConfig, ConfigError> {
    load_with(path, |var| std::env::var(var).ok())
}

/// [`load`] with the environment supplied by `lookup`.
pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<ShieldConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => ShieldConfig::default(),
    };

    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `PORT`, `RATE_LIMIT_WINDOW_MS` and `RATE_LIMIT_MAX` from `lookup`.
pub fn apply_env_overrides<F>(config: &mut ShieldConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = parse_var(&lookup, "PORT")? {
        config.listener.port = port;
    }
    if let Some(window_ms) = parse_var(&lookup, "RATE_LIMIT_WINDOW_MS")? {
        config.rate_limit.window_ms = window_ms;
    }
    if let Some(max) = parse_var(&lookup, "RATE_LIMIT_MAX")? {
        config.rate_limit.max_requests = max;
    }
    Ok(())
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
