//! Configuration management for the bridge.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use tellescope_sync::{ClientConfig, RetryPolicy};

use crate::handlers::EventType;

/// Bridge configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Tellescope API key (secret)
    pub tellescope_api_key: Option<String>,
    /// Tellescope API base URL (secret)
    pub tellescope_api_url: Option<String>,
    /// Per-request timeout for Tellescope calls
    pub request_timeout: Duration,
    /// Retries after the first attempt for retryable Tellescope failures
    pub max_retries: u32,
    /// Minimum time between metadata pulls for one patient
    pub metadata_sync_interval: Duration,
    /// Event types the bridge acts on
    pub enabled_handlers: HashSet<EventType>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = var("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let request_timeout = Duration::from_secs(number(&var, "REQUEST_TIMEOUT_SECS", 30)?);
        let max_retries = number(&var, "MAX_RETRIES", 3)?;
        let metadata_sync_interval =
            Duration::from_secs(number(&var, "METADATA_SYNC_INTERVAL_SECS", 300)?);

        let enabled_handlers = match var("ENABLED_HANDLERS") {
            None => EventType::ALL.into_iter().collect(),
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| {
                    EventType::parse(name).ok_or_else(|| ConfigError::UnknownHandler(name.into()))
                })
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            host,
            port,
            tellescope_api_key: var("TELLESCOPE_API_KEY"),
            tellescope_api_url: var("TELLESCOPE_API_URL"),
            request_timeout,
            max_retries,
            metadata_sync_interval,
            enabled_handlers,
        })
    }

    /// Client settings, or `None` when the secrets are incomplete.
    pub fn client_config(&self) -> Option<ClientConfig> {
        ClientConfig::from_secrets(
            self.tellescope_api_key.as_deref(),
            self.tellescope_api_url.as_deref(),
        )
        .map(|config| {
            config
                .with_timeout(self.request_timeout)
                .with_retry(RetryPolicy::new(self.max_retries))
        })
    }
}

fn number<N: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: N,
) -> Result<N, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {name} value: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Unknown handler in ENABLED_HANDLERS: {0}")]
    UnknownHandler(String),
}
