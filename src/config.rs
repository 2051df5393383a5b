use std::env;
use std::time::Duration;

use crate::sync::SyncSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} has invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    /// `None` disables basic auth.
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub database_url: String,
    pub pool_size: u32,
    pub sync: SyncSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let number = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var).filter(|value| !value.is_empty()) {
                Some(value) => {
                    let parsed = value.trim().parse();
                    parsed.map_err(|_| ConfigError::Invalid { var, value })
                }
                None => Ok(default),
            }
        };

        let rpc = RpcConfig {
            url: required("BITCOIN_RPC_URL")?,
            username: Some(required("BITCOIN_RPC_USER")?),
            password: Some(required("BITCOIN_RPC_PASSWORD")?),
            timeout: Duration::from_secs(number("RPC_TIMEOUT_SECS", 60)?),
        };
        let database_url = required("DATABASE_URL")?;

        let pool_size = number("DATABASE_POOL_SIZE", 2)?;
        let pool_size = u32::try_from(pool_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| ConfigError::Invalid {
                var: "DATABASE_POOL_SIZE",
                value: pool_size.to_string(),
            })?;

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            poll_interval: Duration::from_secs(number("SYNC_POLL_INTERVAL_SECS", defaults.poll_interval.as_secs())?),
            retry_backoff: Duration::from_secs(number("SYNC_RETRY_BACKOFF_SECS", defaults.retry_backoff.as_secs())?),
            progress_every: number("SYNC_PROGRESS_EVERY", defaults.progress_every)?.max(1),
        };

        Ok(Config {
            rpc,
            database_url,
            pool_size,
            sync,
        })
    }
}
