//! Job scheduling and execution engine.
//!
//! Job definitions are registered at startup into a [`registry::JobRegistry`].
//! Their schedules and last outcomes live in a [`store::ScheduleStore`]
//! (SQLite in production, `scheduled_jobs` table). A [`service::SchedulerService`]
//! polls the store on a fixed cadence, claims due records atomically and runs
//! each one through the [`engine::ExecutionEngine`] on its own task.

pub mod engine;
pub mod error;
pub mod job;
#[cfg(feature = "metrics")]
pub mod metrics_names;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use error::{Error, Result};

/// Run database migrations for the scheduler crate.
///
/// This creates the `scheduled_jobs` and `scheduled_job_runs` tables. Should be
/// called at application startup when sharing a pool with
/// [`store_sqlite::SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
