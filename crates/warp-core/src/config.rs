//! Scheduler configuration — store/queue/lock endpoints and tunables.
//!
//! Loaded from an optional TOML file (same `from_file`/`to_toml_string`
//! shape as a plain warp.toml parser) with environment-variable
//! overrides layered on top, matching spec §6 "Environment".

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration inputs to the scheduler (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// PostgreSQL connection string for the authoritative store.
    pub store_url: String,
    /// Redis connection string for the job queue.
    pub queue_redis_url: String,
    /// Redis connection string for the distributed mutex. May point at
    /// the same Redis instance as the queue.
    pub lock_redis_url: String,
    /// Back-off delay before re-enqueuing a deferred deployment.
    pub retry_delay_secs: u64,
    /// Per-cluster mutex TTL — must exceed worst-case decision latency.
    pub mutex_ttl_secs: u64,
    /// How long to wait for the mutex before giving up (-> `Deferred`).
    pub mutex_wait_budget_secs: u64,
    /// Worker tasks to run concurrently in this process.
    pub worker_concurrency: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store_url: String::new(),
            queue_redis_url: "redis://127.0.0.1:6379".to_string(),
            lock_redis_url: "redis://127.0.0.1:6379".to_string(),
            retry_delay_secs: 10,
            mutex_ttl_secs: 30,
            mutex_wait_budget_secs: 10,
            worker_concurrency: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn mutex_ttl(&self) -> Duration {
        Duration::from_secs(self.mutex_ttl_secs)
    }

    pub fn mutex_wait_budget(&self) -> Duration {
        Duration::from_secs(self.mutex_wait_budget_secs)
    }

    /// Parse a config from a TOML file on disk.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load defaults, then apply environment-variable overrides.
    ///
    /// `STORE_URL`, `QUEUE_REDIS_URL`, `LOCK_REDIS_URL`,
    /// `RETRY_DELAY_SECS`, `MUTEX_TTL_SECS`, `MUTEX_WAIT_BUDGET_SECS`,
    /// `WORKER_CONCURRENCY`.
    pub fn from_env() -> Self {
        let mut config = SchedulerConfig::default();
        config.apply_env();
        config
    }

    /// Layer environment-variable overrides on top of an existing config
    /// (e.g. one loaded from a file first).
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("STORE_URL") {
            self.store_url = v;
        }
        if let Ok(v) = std::env::var("QUEUE_REDIS_URL") {
            self.queue_redis_url = v;
        }
        if let Ok(v) = std::env::var("LOCK_REDIS_URL") {
            self.lock_redis_url = v;
        }
        if let Some(v) = parse_env_u64("RETRY_DELAY_SECS") {
            self.retry_delay_secs = v;
        }
        if let Some(v) = parse_env_u64("MUTEX_TTL_SECS") {
            self.mutex_ttl_secs = v;
        }
        if let Some(v) = parse_env_u64("MUTEX_WAIT_BUDGET_SECS") {
            self.mutex_wait_budget_secs = v;
        }
        if let Some(v) = parse_env_u64("WORKER_CONCURRENCY") {
            self.worker_concurrency = v as u32;
        }
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
