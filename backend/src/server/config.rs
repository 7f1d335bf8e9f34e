//! Environment-driven configuration for the binaries.
//!
//! Every knob has the documented default; malformed values fail boot
//! loudly rather than silently falling back.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Errors raised while reading the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Shard topology: logical-shard counts and physical fleet sizes.
///
/// Changing any of these invalidates placement for existing data and
/// requires a migration; they are read once at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTopology {
    pub user_logical_shards: u32,
    pub todo_logical_shards: u32,
    pub user_clusters: usize,
    pub todo_clusters: usize,
    pub tables_per_db: u32,
}

/// Realtime hub knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub max_per_list: usize,
    pub ping_interval: Duration,
    pub read_deadline: Duration,
    pub subscribe_retry: Duration,
}

/// Index retry worker knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub batch_size: u32,
}

/// Full configuration for the service binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub topology: ShardTopology,
    pub cache_ttl: Duration,
    pub hub: HubConfig,
    pub retry: RetryConfig,
    pub database_url_base: String,
    pub redis_url: String,
    pub bind_addr: String,
    pub realtime_bind_addr: String,
    pub ensure_tables: bool,
}

impl AppConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            topology: ShardTopology {
                user_logical_shards: env_parse("USER_LOGICAL_SHARDS", 1024)?,
                todo_logical_shards: env_parse("TODO_LOGICAL_SHARDS", 4096)?,
                user_clusters: env_parse("USER_CLUSTERS", 16)?,
                todo_clusters: env_parse("TODO_CLUSTERS", 64)?,
                tables_per_db: env_parse("TABLES_PER_DB", 64)?,
            },
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", 300)?),
            hub: HubConfig {
                max_per_list: env_parse("HUB_MAX_PER_LIST", 500)?,
                ping_interval: Duration::from_secs(env_parse("HUB_PING_INTERVAL_SECS", 20)?),
                read_deadline: Duration::from_secs(env_parse("HUB_READ_DEADLINE_SECS", 30)?),
                subscribe_retry: Duration::from_secs(env_parse("HUB_SUBSCRIBE_RETRY_SECS", 3)?),
            },
            retry: RetryConfig {
                max_retries: env_parse("INDEX_RETRY_MAX", 5)?,
                batch_size: env_parse("INDEX_RETRY_BATCH", 100)?,
            },
            database_url_base: env_string(
                "DATABASE_URL_BASE",
                "postgres://postgres@localhost:5432",
            ),
            redis_url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8080"),
            realtime_bind_addr: env_string("REALTIME_BIND_ADDR", "0.0.0.0:8091"),
            ensure_tables: env_parse::<u8>("ENSURE_TABLES", 0)? != 0,
        })
    }

    /// Database name of one user cluster.
    pub fn user_cluster_name(&self, index: usize) -> String {
        format!("todo_user_db_{index}")
    }

    /// Database name of one todo cluster.
    pub fn todo_cluster_name(&self, index: usize) -> String {
        format!("todo_data_db_{index}")
    }

    /// Connection URL of one user cluster.
    pub fn user_cluster_url(&self, index: usize) -> String {
        format!("{}/{}", self.database_url_base, self.user_cluster_name(index))
    }

    /// Connection URL of one todo cluster.
    pub fn todo_cluster_url(&self, index: usize) -> String {
        format!("{}/{}", self.database_url_base, self.todo_cluster_name(index))
    }
}
