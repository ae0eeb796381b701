//! Environment-driven application configuration.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env_var(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse {:?}", raw),
        }),
        None => Ok(default),
    }
}

/// Complete application configuration, loaded once at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub auth: AuthConfig,
    pub steam: SteamConfig,
    pub sync: SyncConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseSettings::from_env()?,
            redis: RedisSettings::from_env()?,
            auth: AuthConfig::from_env(),
            steam: SteamConfig::from_env()?,
            sync: SyncConfig::from_env()?,
        })
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT", 3000)?,
            log_level: env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

#[derive(Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_var("DATABASE_URL")
                .ok_or_else(|| ConfigError::MissingRequired("DATABASE_URL".to_string()))?,
            max_connections: env_parse("MAX_CONNECTIONS", 20)?,
        })
    }
}

/// Redis backs the job queue, sync state, rate limiter window, and progress
/// snapshots. `QUEUE_URL` / `BUS_URL` may point the queue and the bus at
/// separate instances; both default to `REDIS_URL`.
#[derive(Clone)]
pub struct RedisSettings {
    pub queue_url: String,
    pub bus_url: String,
}

impl RedisSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let base = env_var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        Ok(Self {
            queue_url: env_var("QUEUE_URL").unwrap_or_else(|| base.clone()),
            bus_url: env_var("BUS_URL").unwrap_or_else(|| base.clone()),
        })
    }
}

/// Auth is enabled only when both admin credentials are configured; otherwise
/// the API trusts the reverse proxy and every caller is the operator.
#[derive(Clone)]
pub struct AuthConfig {
    pub secret_key: String,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub mcp_api_key: Option<String>,
}

impl AuthConfig {
    fn from_env() -> Self {
        Self {
            secret_key: env_var("SECRET_KEY").unwrap_or_else(|| "dev-secret-key".to_string()),
            admin_email: env_var("ADMIN_EMAIL"),
            admin_password: env_var("ADMIN_PASSWORD"),
            mcp_api_key: env_var("MCP_API_KEY"),
        }
    }

    pub fn enabled(&self) -> bool {
        self.admin_email.is_some() && self.admin_password.is_some()
    }
}

#[derive(Clone)]
pub struct SteamConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub store_api_base: String,
    pub library_cache_ttl: Duration,
}

impl SteamConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let cache_ttl_secs: u64 = env_parse("CACHE_TTL", 3600)?;
        Ok(Self {
            api_key: env_var("STEAM_API_KEY"),
            api_base: env_var("STEAM_API_BASE")
                .unwrap_or_else(|| "https://api.steampowered.com".to_string()),
            store_api_base: env_var("STEAM_STORE_API_BASE")
                .unwrap_or_else(|| "https://store.steampowered.com".to_string()),
            library_cache_ttl: Duration::from_secs(cache_ttl_secs),
        })
    }
}

#[derive(Clone)]
pub struct SyncConfig {
    /// Number of concurrent sync workers in this process.
    pub workers: usize,
    /// Games per catalog upsert batch.
    pub upsert_batch_size: usize,
    /// Per-library lock TTL; must cover the job timeout.
    pub lock_ttl: Duration,
    /// Per-job execution timeout.
    pub job_timeout: Duration,
    /// Interval between scheduled incremental syncs; zero disables.
    pub schedule_interval: Duration,
}

impl SyncConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let workers = env_parse("WORKERS", 2usize)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            workers,
            upsert_batch_size: 100,
            lock_ttl: Duration::from_secs(env_parse("SYNC_LOCK_TTL_SECS", 2 * 60 * 60 + 300)?),
            job_timeout: Duration::from_secs(env_parse("SYNC_JOB_TIMEOUT_SECS", 2 * 60 * 60)?),
            schedule_interval: Duration::from_secs(env_parse("SYNC_SCHEDULE_INTERVAL_SECS", 0)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_ttl_covers_job_timeout() {
        let sync = SyncConfig {
            workers: 2,
            upsert_batch_size: 100,
            lock_ttl: Duration::from_secs(7500),
            job_timeout: Duration::from_secs(7200),
            schedule_interval: Duration::from_secs(0),
        };
        assert!(sync.lock_ttl >= sync.job_timeout);
    }

    #[test]
    fn auth_disabled_without_both_credentials() {
        let auth = AuthConfig {
            secret_key: "k".to_string(),
            admin_email: Some("admin@example.com".to_string()),
            admin_password: None,
            mcp_api_key: None,
        };
        assert!(!auth.enabled());
    }
}
