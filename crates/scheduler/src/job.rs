//! The contract job authors implement.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    sqlx::SqlitePool,
};

use crate::{Error, Result};

/// One runnable unit of work.
///
/// Definitions are constructed once at startup, registered into a
/// [`JobRegistry`](crate::registry::JobRegistry), and never mutated afterwards.
/// `execute` may block on I/O; wrap CPU-heavy or synchronous work in
/// `tokio::task::spawn_blocking`.
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable identity, unique across the registry.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Configuration used when no stored configuration exists. Stored
    /// configuration is merged on top of it.
    fn default_config(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    /// Reject a configuration before `execute` is called. The error string is
    /// reported verbatim as the failure message.
    fn validate(&self, _config: &Value) -> std::result::Result<(), String> {
        Ok(())
    }

    async fn execute(&self, config: Value, ctx: &JobContext) -> anyhow::Result<JobOutput>;
}

/// Document returned by a job body.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub output: Value,
    /// The job decided not to do anything (e.g. disabled by its own config).
    pub skipped: bool,
}

impl JobOutput {
    pub fn new(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            skipped: false,
        }
    }

    pub fn skipped(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
            skipped: true,
        }
    }
}

/// Handle passed to a running job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    /// Claim token of this execution.
    pub run_id: String,
    pool: Option<SqlitePool>,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            run_id: run_id.into(),
            pool: None,
        }
    }

    #[must_use]
    pub fn with_pool(mut self, pool: Option<SqlitePool>) -> Self {
        self.pool = pool;
        self
    }

    /// Database pool of the backing store.
    pub fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .as_ref()
            .ok_or_else(|| Error::message("store does not expose a database pool"))
    }
}

/// Serialisable description of a registered job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInfo {
    pub job_id: String,
    pub name: String,
    pub description: String,
    pub default_config: Value,
}

impl JobInfo {
    pub fn from_job(job: &dyn Job) -> Self {
        Self {
            job_id: job.id().to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            default_config: job.default_config(),
        }
    }
}
