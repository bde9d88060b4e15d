//! Config schema. Every field has a default, so an empty file is valid.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobdeckConfig {
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
}

/// Poll loop and execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between poll cycles (1..=3600).
    pub poll_interval_secs: u64,
    /// A record left `running` longer than this is reset to `failed`.
    pub stale_after_secs: u64,
    /// Upper bound on executions running at once.
    pub max_concurrent_jobs: usize,
    /// Characters of job output kept in `last_output`.
    pub output_summary_chars: usize,
    pub writeback_attempts: u32,
    pub writeback_backoff_ms: u64,
    /// Start the poll loop with `jobdeck serve`.
    pub autostart: bool,
    /// Run history rows kept per job.
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            stale_after_secs: 2 * 60 * 60,
            max_concurrent_jobs: 8,
            output_summary_chars: 500,
            writeback_attempts: 3,
            writeback_backoff_ms: 500,
            autostart: true,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://jobdeck.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}
