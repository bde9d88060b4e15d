//! Persistence trait for schedule records and run history.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::SqlitePool,
};

use crate::{
    Result,
    types::{RunCompletion, RunRecord, ScheduleSave, ScheduledJobRecord},
};

/// `last_output` written when a stuck `running` record is reset.
pub const STALE_RUN_OUTPUT: &str =
    r#"{"status":"failed","error":"execution did not finish before the stale deadline"}"#;

/// Persistence backend for the scheduler.
///
/// Every read-modify-write of a record is a single atomic operation in the
/// implementation; callers never read a record and write it back themselves
/// to change `last_status`.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// All records, active first, then most recently run first.
    async fn list_records(&self) -> Result<Vec<ScheduledJobRecord>>;

    async fn get_record(&self, job_id: &str) -> Result<Option<ScheduledJobRecord>>;

    /// Insert or update the editable columns of a record, keyed by `job_id`.
    async fn save_schedule(&self, save: &ScheduleSave) -> Result<ScheduledJobRecord>;

    /// Remove a record. Returns whether one existed.
    async fn delete_record(&self, job_id: &str) -> Result<bool>;

    /// Active, non-manual records whose `last_status` is not `running`.
    async fn list_candidates(&self) -> Result<Vec<ScheduledJobRecord>>;

    /// Atomically mark the record `running` under `claim_id`.
    ///
    /// Returns `false` without changing anything when the record is missing or
    /// already running. `is_active` is not checked here: the poll filter
    /// handles it, and explicit triggers may run inactive records.
    async fn try_claim(&self, job_id: &str, claim_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Write the outcome of the execution holding `claim_id` and release the
    /// claim. Returns `false` when the claim no longer owns the record.
    async fn complete_run(
        &self,
        job_id: &str,
        claim_id: &str,
        completion: &RunCompletion,
    ) -> Result<bool>;

    /// Reset `running` records claimed before `cutoff` to `failed`.
    ///
    /// Records without a claim time fall back to `last_run` (or are treated as
    /// infinitely old). Returns the job ids that were reset.
    async fn recover_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>)
    -> Result<Vec<String>>;

    async fn append_run(&self, run: &RunRecord) -> Result<()>;

    /// Most recent runs of a job, oldest first.
    async fn recent_runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunRecord>>;

    /// Keep only the newest `keep` runs of a job.
    async fn prune_runs(&self, job_id: &str, keep: usize) -> Result<()>;

    /// Database pool handed to jobs, if the store has one.
    fn sql_pool(&self) -> Option<SqlitePool> {
        None
    }
}
