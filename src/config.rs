//! Server configuration from the environment
//!
//! `.env` is loaded first (if present), then:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `TP_DOMAIN` | required |
//! | `TP_API_TOKEN` or `TP_USERNAME` + `TP_PASSWORD` | one required |
//! | `CACHE_TTL` (ms) | 300000 |
//! | `HEARTBEAT_INTERVAL` (ms) | 30000 |
//! | `ENABLE_REAL_TIME` | true |
//! | `PORT` / `SERVER_PORT` | 3000 |
//! | `ALLOWED_ORIGINS` (comma separated) | `http://localhost:3000` |
//!
//! Numeric values that are missing, unparsable or zero fall back to the default.

use std::time::Duration;

use tracing::info;
use url::Url;

use crate::broadcast::DEFAULT_HEARTBEAT_INTERVAL;
use crate::error::ConfigError;
use crate::store::DEFAULT_TTL;
use crate::upstream::{ClientConfig, Credentials};

pub const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub cache_ttl: Duration,
    pub heartbeat_interval: Duration,
    /// Heartbeat sweeps run only when real-time updates are enabled
    pub real_time_enabled: bool,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    /// Load `.env`, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let domain = get("TP_DOMAIN").ok_or_else(|| ConfigError::Missing("TP_DOMAIN".into()))?;
        let credentials = match (get("TP_API_TOKEN"), get("TP_USERNAME"), get("TP_PASSWORD")) {
            (Some(token), _, _) => Credentials::ApiToken(token),
            (None, Some(username), Some(password)) => Credentials::Basic { username, password },
            _ => return Err(ConfigError::MissingCredentials),
        };

        let client = ClientConfig::for_domain(domain.trim(), credentials);
        Url::parse(&client.base_url).map_err(|source| ConfigError::BaseUrl {
            url: client.base_url.clone(),
            source,
        })?;

        let millis = |key: &str, default: Duration| {
            get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map_or(default, Duration::from_millis)
        };

        let port = get("PORT")
            .or_else(|| get("SERVER_PORT"))
            .and_then(|p| p.trim().parse::<u16>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PORT);

        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()]);

        Ok(Self {
            client,
            cache_ttl: millis("CACHE_TTL", DEFAULT_TTL),
            heartbeat_interval: millis("HEARTBEAT_INTERVAL", DEFAULT_HEARTBEAT_INTERVAL),
            real_time_enabled: get("ENABLE_REAL_TIME").as_deref() != Some("false"),
            port,
            allowed_origins,
        })
    }
}
