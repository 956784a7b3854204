use std::str::FromStr;
use std::time::Duration;

use scrapeapi_core::error::AppError;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Listener and admission settings for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    /// Cap on queued plus running jobs. `None` is unbounded.
    pub max_in_flight: Option<usize>,
    pub allow_private_urls: bool,
    /// How long shutdown waits for running jobs.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_in_flight: None,
            allow_private_urls: false,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: get("SCRAPEAPI_HOST").unwrap_or(defaults.host),
            port: parse_or(get("SCRAPEAPI_PORT"), "SCRAPEAPI_PORT", defaults.port)?,
            max_body_bytes: parse_or(
                get("SCRAPEAPI_MAX_BODY_BYTES"),
                "SCRAPEAPI_MAX_BODY_BYTES",
                defaults.max_body_bytes,
            )?,
            max_in_flight: get("SCRAPEAPI_MAX_IN_FLIGHT")
                .map(|v| parse::<usize>(&v, "SCRAPEAPI_MAX_IN_FLIGHT"))
                .transpose()?
                .filter(|n| *n > 0),
            allow_private_urls: parse_or(
                get("SCRAPEAPI_ALLOW_PRIVATE_URLS"),
                "SCRAPEAPI_ALLOW_PRIVATE_URLS",
                false,
            )?,
            shutdown_grace: Duration::from_secs(parse_or(
                get("SCRAPEAPI_SHUTDOWN_GRACE_SECS"),
                "SCRAPEAPI_SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: FromStr>(value: &str, key: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::ConfigError(format!("{key} has invalid value '{value}'")))
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, AppError> {
    value.map_or(Ok(default), |v| parse(&v, key))
}
