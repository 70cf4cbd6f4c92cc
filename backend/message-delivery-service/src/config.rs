use crate::error::AppError;
use crate::worker::WorkerConfig;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DbSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Wait for a pooled connection before giving up
    pub acquire_timeout_secs: u64,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub batch_size: usize,
    /// Server-side BLOCK per XREADGROUP while the worker waits for entries
    pub block_ms: u64,
    /// `0` disables the unit-of-work deadline
    pub persist_timeout_ms: u64,
    /// `0` disables dead-lettering after repeated failures
    pub max_attempts: u32,
    /// Minimum idle time before another consumer's pending entry is taken over
    pub reclaim_idle_ms: u64,
}

impl WorkerSettings {
    pub fn block_slice(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::new(&self.consumer_group, &self.consumer_name);
        config.batch_size = self.batch_size.max(1);
        config.persist_timeout =
            (self.persist_timeout_ms > 0).then(|| Duration::from_millis(self.persist_timeout_ms));
        config.max_attempts = self.max_attempts;
        config.reclaim_min_idle = Duration::from_millis(self.reclaim_idle_ms);
        config
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            stream_key: "message_stream".into(),
            consumer_group: "message_workers".into(),
            consumer_name: DEFAULT_CONSUMER_NAME.into(),
            batch_size: 1,
            block_ms: 5000,
            persist_timeout_ms: 10_000,
            max_attempts: 5,
            reclaim_idle_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub db: DbSettings,
    pub worker: WorkerSettings,
}

/// Kept stable so a restarted process finds its own pending entries.
const DEFAULT_CONSUMER_NAME: &str = "message-worker";

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let port = env_or("PORT", 8080);

        let db_defaults = DbSettings::default();
        let db = DbSettings {
            max_connections: env_or("DB_MAX_CONNECTIONS", db_defaults.max_connections),
            min_connections: env_or("DB_MIN_CONNECTIONS", db_defaults.min_connections),
            acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", db_defaults.acquire_timeout_secs),
        };
        if db.min_connections > db.max_connections {
            return Err(AppError::Config(format!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                db.min_connections, db.max_connections
            )));
        }

        let worker_defaults = WorkerSettings::default();
        let worker = WorkerSettings {
            stream_key: env::var("MESSAGE_STREAM_KEY").unwrap_or(worker_defaults.stream_key),
            consumer_group: env::var("CONSUMER_GROUP").unwrap_or(worker_defaults.consumer_group),
            consumer_name: env::var("CONSUMER_NAME").unwrap_or(worker_defaults.consumer_name),
            batch_size: env_or("WORKER_BATCH_SIZE", worker_defaults.batch_size),
            block_ms: env_or("WORKER_BLOCK_MS", worker_defaults.block_ms),
            persist_timeout_ms: env_or(
                "WORKER_PERSIST_TIMEOUT_MS",
                worker_defaults.persist_timeout_ms,
            ),
            max_attempts: env_or("WORKER_MAX_ATTEMPTS", worker_defaults.max_attempts),
            reclaim_idle_ms: env_or("WORKER_RECLAIM_IDLE_MS", worker_defaults.reclaim_idle_ms),
        };
        if worker.stream_key.is_empty()
            || worker.consumer_group.is_empty()
            || worker.consumer_name.is_empty()
        {
            return Err(AppError::Config(
                "MESSAGE_STREAM_KEY, CONSUMER_GROUP and CONSUMER_NAME must not be empty".into(),
            ));
        }

        Ok(Self {
            database_url,
            redis_url,
            port,
            db,
            worker,
        })
    }
}
