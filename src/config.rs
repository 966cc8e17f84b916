use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

pub const DEFAULT_GEOCODING_API_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub const DEFAULT_WEATHER_API_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_SEARCH_API_URL: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub search_api_key: Option<String>,
    pub upstream: UpstreamConfig,
}

/// Endpoints and call policy for the outbound lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub geocoding_url: String,
    pub weather_url: String,
    pub search_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            geocoding_url: DEFAULT_GEOCODING_API_URL.to_string(),
            weather_url: DEFAULT_WEATHER_API_URL.to_string(),
            search_url: DEFAULT_SEARCH_API_URL.to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PORT must be a valid u16")]
    InvalidPort,
    #[error("UPSTREAM_TIMEOUT_SECS must be a positive integer")]
    InvalidTimeout,
    #[error("UPSTREAM_MAX_RETRIES must be an integer between 0 and 10")]
    InvalidMaxRetries,
    #[error("{0} must be an http(s) URL")]
    InvalidUrl(&'static str),
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = non_empty("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = non_empty("PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(3001);
        let search_api_key = non_empty("BRAVE_API_KEY");

        let defaults = UpstreamConfig::default();
        let timeout = non_empty("UPSTREAM_TIMEOUT_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .ok_or(ConfigError::InvalidTimeout)
            })
            .transpose()?
            .unwrap_or(defaults.timeout);
        let max_retries = non_empty("UPSTREAM_MAX_RETRIES")
            .map(|value| {
                value
                    .parse::<u32>()
                    .ok()
                    .filter(|retries| *retries <= 10)
                    .ok_or(ConfigError::InvalidMaxRetries)
            })
            .transpose()?
            .unwrap_or(defaults.max_retries);

        let upstream = UpstreamConfig {
            geocoding_url: url_or_default(
                non_empty("GEOCODING_API_URL"),
                "GEOCODING_API_URL",
                defaults.geocoding_url,
            )?,
            weather_url: url_or_default(
                non_empty("WEATHER_API_URL"),
                "WEATHER_API_URL",
                defaults.weather_url,
            )?,
            search_url: url_or_default(
                non_empty("SEARCH_API_URL"),
                "SEARCH_API_URL",
                defaults.search_url,
            )?,
            timeout,
            max_retries,
            retry_base_delay: defaults.retry_base_delay,
        };

        let config = Self {
            bind_addr,
            port,
            search_api_key,
            upstream,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn url_or_default(
    value: Option<String>,
    key: &'static str,
    default: String,
) -> Result<String, ConfigError> {
    match value {
        None => Ok(default),
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(url),
        Some(_) => Err(ConfigError::InvalidUrl(key)),
    }
}
