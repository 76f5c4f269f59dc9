use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub refresh: RefreshConfig,
    pub snapshot_cache: SnapshotCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between scheduled metrics refreshes. 0 disables the schedule.
    pub interval_secs: u64,
    /// Links processed concurrently by fleet-wide operations
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value '{}'", key, value)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./eventlink.db".to_string());
        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 5u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_or("API_PORT", 8080u16)?;

        let refresh_interval_secs = env_or("REFRESH_INTERVAL_SECS", 900u64)?;
        let mut refresh_concurrency = env_or("REFRESH_CONCURRENCY", 8usize)?;
        if refresh_concurrency == 0 {
            tracing::warn!("REFRESH_CONCURRENCY must be at least 1, using 1");
            refresh_concurrency = 1;
        }

        let cache_ttl_secs = env_or("SNAPSHOT_CACHE_TTL_SECS", 60u64)?;
        let cache_max_entries = env_or("SNAPSHOT_CACHE_MAX_ENTRIES", 10_000u64)?;

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            refresh: RefreshConfig {
                interval_secs: refresh_interval_secs,
                concurrency: refresh_concurrency,
            },
            snapshot_cache: SnapshotCacheConfig {
                max_entries: cache_max_entries,
                ttl_secs: cache_ttl_secs,
            },
        })
    }
}
