//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variables that override store settings from the file.
pub const ENV_STORE_URL: &str = "AUTH_STORE_URL";
pub const ENV_STORE_USERNAME: &str = "AUTH_STORE_USERNAME";
pub const ENV_STORE_PASSWORD: &str = "AUTH_STORE_PASSWORD";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Built-in defaults plus environment overrides, for runs without a file.
pub fn load_defaults() -> Result<AppConfig, ConfigError> {
    parse_config("", |key| std::env::var(key).ok())
}

/// Parse, apply overrides, and validate configuration text.
///
/// `env` resolves override variables; tests pass a closure instead of
/// touching the process environment.
pub fn parse_config<F>(content: &str, env: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: AppConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, env);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut AppConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env(ENV_STORE_URL) {
        config.store.url = url;
    }
    if let Some(username) = env(ENV_STORE_USERNAME) {
        config.store.username = Some(username);
    }
    if let Some(password) = env(ENV_STORE_PASSWORD) {
        config.store.password = Some(password);
    }
}
