use {
    async_trait::async_trait,
    jobdeck_scheduler::job::{Job, JobContext, JobOutput},
    serde_json::{Map, Value, json},
    tracing::debug,
};

/// Row counts of SQLite tables in the scheduler database.
pub struct TableStatsJob;

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl Job for TableStatsJob {
    fn id(&self) -> &str {
        "table_stats"
    }

    fn name(&self) -> &str {
        "Table statistics"
    }

    fn description(&self) -> &str {
        "Counts rows of the configured tables"
    }

    fn default_config(&self) -> Value {
        json!({ "tables": ["scheduled_jobs", "scheduled_job_runs"] })
    }

    fn validate(&self, config: &Value) -> Result<(), String> {
        let tables = config["tables"]
            .as_array()
            .ok_or("tables must be an array of table names")?;
        if tables.is_empty() {
            return Err("tables must not be empty".into());
        }
        for table in tables {
            match table.as_str() {
                Some(name) if is_identifier(name) => {},
                _ => return Err(format!("invalid table name: {table}")),
            }
        }
        Ok(())
    }

    async fn execute(&self, config: Value, ctx: &JobContext) -> anyhow::Result<JobOutput> {
        let pool = ctx.pool()?;
        let mut counts = Map::new();
        for name in config["tables"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            // Names are checked by `validate`, quoting keeps keywords usable.
            let sql = format!("SELECT COUNT(*) FROM \"{name}\"");
            let rows: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
            debug!(table = name, rows, "counted");
            counts.insert(name.to_string(), json!(rows));
        }
        Ok(JobOutput::new(json!({ "tables": counts })))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        jobdeck_scheduler::{
            engine::ExecutionEngine,
            store::ScheduleStore,
            store_sqlite::SqliteStore,
            types::{FailureKind, RunStatus},
        },
    };

    #[test]
    fn identifiers() {
        assert!(is_identifier("scheduled_jobs"));
        assert!(is_identifier("_t1"));
        assert!(!is_identifier("1t"));
        assert!(!is_identifier("jobs; DROP TABLE x"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn rejects_bad_table_lists() {
        assert!(TableStatsJob.validate(&json!({ "tables": [] })).is_err());
        assert!(TableStatsJob.validate(&json!({ "tables": "jobs" })).is_err());
        assert!(
            TableStatsJob
                .validate(&json!({ "tables": ["a-b"] }))
                .unwrap_err()
                .contains("a-b")
        );
    }

    #[tokio::test]
    async fn counts_rows_through_store_pool() {
        let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
        let ctx = JobContext::new("table_stats", "run-1").with_pool(store.sql_pool());

        let result = ExecutionEngine.run(&TableStatsJob, None, &ctx).await;
        assert_eq!(result.status, RunStatus::Success, "{:?}", result.error);
        assert_eq!(result.output["tables"]["scheduled_jobs"], 0);
        assert_eq!(result.output["tables"]["scheduled_job_runs"], 0);
    }

    #[tokio::test]
    async fn missing_pool_fails_execution() {
        let ctx = JobContext::new("table_stats", "run-1");
        let result = ExecutionEngine.run(&TableStatsJob, None, &ctx).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Execution));
    }
}
