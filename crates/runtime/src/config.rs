//! Tracker configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storage::Overflow;

/// Settings for a [`Tracker`](crate::Tracker), usually read from the
/// `[tracker]` table of `beacon.toml`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Collection endpoint, e.g. `https://collect.example.com`.
    pub endpoint: String,
    /// Account ids the events are reported to.
    pub track_ids: Vec<String>,

    /// Most entries per batch.
    pub max_batch_size: usize,
    /// Most bytes of encoded body per batch.
    pub max_batch_bytes: usize,
    /// Timer-driven flush period.
    pub flush_interval_ms: u64,
    /// Pending count that triggers an early flush.
    pub flush_threshold: usize,

    pub max_queue_entries: usize,
    pub overflow: Overflow,

    pub max_retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_ceiling_ms: u64,
    pub backoff_jitter: bool,
    pub request_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,

    /// Idle time after which the next event starts a new session.
    pub session_timeout_secs: u64,
    pub app_version: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".into(),
            track_ids: vec!["default".into()],
            max_batch_size: 50,
            max_batch_bytes: 64 * 1024,
            flush_interval_ms: 15_000,
            flush_threshold: 20,
            max_queue_entries: 10_000,
            overflow: Overflow::default(),
            max_retry_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_ceiling_ms: 60_000,
            backoff_jitter: true,
            request_timeout_ms: 10_000,
            shutdown_timeout_ms: 3_000,
            session_timeout_secs: 30 * 60,
            app_version: None,
        }
    }
}

impl TrackerConfig {
    /// Parse a config from the body of a `[tracker]` table.
    pub fn parse(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings make sense together.
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::Config("endpoint must not be empty".into()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::Config(format!(
                "endpoint must be an http(s) url: {endpoint}"
            )));
        }
        if self.track_ids.is_empty() || self.track_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(Error::Config("track_ids must list non-empty ids".into()));
        }
        if self.max_batch_size == 0 || self.max_batch_bytes == 0 {
            return Err(Error::Config("batch limits must be positive".into()));
        }
        if self.max_queue_entries == 0 {
            return Err(Error::Config("max_queue_entries must be positive".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config("flush_interval_ms must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".into()));
        }
        if self.backoff_base_ms == 0 {
            return Err(Error::Config("backoff_base_ms must be positive".into()));
        }
        if self.backoff_ceiling_ms < self.backoff_base_ms {
            return Err(Error::Config(format!(
                "backoff_ceiling_ms ({}) is below backoff_base_ms ({})",
                self.backoff_ceiling_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}
