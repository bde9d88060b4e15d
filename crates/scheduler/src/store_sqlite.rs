//! SQLite-backed schedule store using sqlx.

use std::{str::FromStr, time::Duration};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    },
    tracing::warn,
};

use crate::{
    Error, Result,
    store::{STALE_RUN_OUTPUT, ScheduleStore},
    types::{JobStatus, RunCompletion, RunRecord, ScheduleSave, ScheduledJobRecord},
};

const RECORD_COLUMNS: &str = "id, job_id, job_name, description, config_json, schedule_type, \
     schedule_value, is_active, last_run, next_run, last_status, last_output, claim_id, \
     claimed_at, updated_at";

/// SQLite-backed persistence for schedule records and run history.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open `database_url` with its own pool and run migrations.
    ///
    /// In-memory databases are limited to one connection, since every
    /// connection would otherwise see its own empty database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };
        let pool = pool_options.connect_with(options).await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::message(format!("timestamp out of range: {ms}")))
}

fn from_opt_ms(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_ms).transpose()
}

fn record_from_row(row: &SqliteRow) -> Result<ScheduledJobRecord> {
    let schedule_type: String = row.try_get("schedule_type")?;
    let last_status: Option<String> = row.try_get("last_status")?;
    Ok(ScheduledJobRecord {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        job_name: row.try_get("job_name")?,
        description: row.try_get("description")?,
        config_json: row.try_get("config_json")?,
        schedule_type: schedule_type.parse()?,
        schedule_value: row.try_get("schedule_value")?,
        is_active: row.try_get("is_active")?,
        last_run: from_opt_ms(row.try_get("last_run")?)?,
        next_run: from_opt_ms(row.try_get("next_run")?)?,
        last_status: last_status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()?,
        last_output: row.try_get("last_output")?,
        claim_id: row.try_get("claim_id")?,
        claimed_at: from_opt_ms(row.try_get("claimed_at")?)?,
        updated_at: from_ms(row.try_get("updated_at")?)?,
    })
}

/// Decode a listing. Rows that do not decode are logged and left out.
fn records_from_rows(rows: &[SqliteRow]) -> Vec<ScheduledJobRecord> {
    rows.iter()
        .filter_map(|row| match record_from_row(row) {
            Ok(record) => Some(record),
            Err(e) => {
                let job_id: String = row.try_get("job_id").unwrap_or_default();
                warn!(job_id = %job_id, error = %e, "skipping undecodable schedule record");
                None
            },
        })
        .collect()
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn list_records(&self) -> Result<Vec<ScheduledJobRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM scheduled_jobs
             ORDER BY is_active DESC, last_run DESC, job_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records_from_rows(&rows))
    }

    async fn get_record(&self, job_id: &str) -> Result<Option<ScheduledJobRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM scheduled_jobs WHERE job_id = ?"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn save_schedule(&self, save: &ScheduleSave) -> Result<ScheduledJobRecord> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO scheduled_jobs
                (job_id, job_name, description, config_json, schedule_type, schedule_value,
                 is_active, next_run, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(job_id) DO UPDATE SET
                job_name = excluded.job_name,
                description = excluded.description,
                config_json = excluded.config_json,
                schedule_type = excluded.schedule_type,
                schedule_value = excluded.schedule_value,
                is_active = excluded.is_active,
                next_run = excluded.next_run,
                updated_at = excluded.updated_at",
        )
        .bind(&save.job_id)
        .bind(&save.job_name)
        .bind(&save.description)
        .bind(&save.config_json)
        .bind(save.schedule_type.as_str())
        .bind(&save.schedule_value)
        .bind(save.is_active)
        .bind(save.next_run.map(to_ms))
        .bind(to_ms(save.updated_at))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM scheduled_jobs WHERE job_id = ?"
        ))
        .bind(&save.job_id)
        .fetch_one(&mut *tx)
        .await?;
        let record = record_from_row(&row)?;
        tx.commit().await?;
        Ok(record)
    }

    async fn delete_record(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_candidates(&self) -> Result<Vec<ScheduledJobRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM scheduled_jobs
             WHERE is_active = 1
               AND schedule_type != 'manual'
               AND (last_status IS NULL OR last_status != 'running')
             ORDER BY job_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records_from_rows(&rows))
    }

    async fn try_claim(&self, job_id: &str, claim_id: &str, now: DateTime<Utc>) -> Result<bool> {
        // Compare-and-set: the status check and the write are one statement.
        let result = sqlx::query(
            "UPDATE scheduled_jobs
             SET last_status = 'running', claim_id = ?, claimed_at = ?, updated_at = ?
             WHERE job_id = ?
               AND (last_status IS NULL OR last_status != 'running')",
        )
        .bind(claim_id)
        .bind(to_ms(now))
        .bind(to_ms(now))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_run(
        &self,
        job_id: &str,
        claim_id: &str,
        completion: &RunCompletion,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE scheduled_jobs
             SET last_run = ?, last_status = ?, last_output = ?, next_run = ?,
                 claim_id = NULL, claimed_at = NULL, updated_at = ?
             WHERE job_id = ? AND claim_id = ?",
        )
        .bind(to_ms(completion.last_run))
        .bind(completion.status.as_str())
        .bind(&completion.last_output)
        .bind(completion.next_run.map(to_ms))
        .bind(to_ms(completion.last_run))
        .bind(job_id)
        .bind(claim_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn recover_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut recovered: Vec<String> = sqlx::query_scalar(
            "UPDATE scheduled_jobs
             SET last_status = 'failed', last_output = ?, claim_id = NULL, claimed_at = NULL,
                 updated_at = ?
             WHERE last_status = 'running' AND COALESCE(claimed_at, last_run, 0) < ?
             RETURNING job_id",
        )
        .bind(STALE_RUN_OUTPUT)
        .bind(to_ms(now))
        .bind(to_ms(cutoff))
        .fetch_all(&self.pool)
        .await?;
        recovered.sort();
        Ok(recovered)
    }

    async fn append_run(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO scheduled_job_runs
                (job_id, claim_id, started_at, finished_at, status, duration_seconds, error, summary)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.job_id)
        .bind(&run.claim_id)
        .bind(to_ms(run.started_at))
        .bind(to_ms(run.finished_at))
        .bind(run.status.as_str())
        .bind(run.duration_seconds)
        .bind(&run.error)
        .bind(&run.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            "SELECT job_id, claim_id, started_at, finished_at, status, duration_seconds, error, summary
             FROM scheduled_job_runs
             WHERE job_id = ?
             ORDER BY started_at DESC, id DESC
             LIMIT ?",
        )
        .bind(job_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            runs.push(RunRecord {
                job_id: row.try_get("job_id")?,
                claim_id: row.try_get("claim_id")?,
                started_at: from_ms(row.try_get("started_at")?)?,
                finished_at: from_ms(row.try_get("finished_at")?)?,
                status: status.parse()?,
                duration_seconds: row.try_get("duration_seconds")?,
                error: row.try_get("error")?,
                summary: row.try_get("summary")?,
            });
        }
        // Oldest first, like the in-memory store.
        runs.reverse();
        Ok(runs)
    }

    async fn prune_runs(&self, job_id: &str, keep: usize) -> Result<()> {
        sqlx::query(
            "DELETE FROM scheduled_job_runs
             WHERE job_id = ?
               AND id NOT IN (
                   SELECT id FROM scheduled_job_runs
                   WHERE job_id = ?
                   ORDER BY started_at DESC, id DESC
                   LIMIT ?
               )",
        )
        .bind(job_id)
        .bind(job_id)
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn sql_pool(&self) -> Option<SqlitePool> {
        Some(self.pool.clone())
    }
}
