//! Metric names recorded when the `metrics` feature is enabled.

/// Total job executions started
pub const EXECUTIONS_TOTAL: &str = "jobdeck_executions_total";
/// Executions that ended with status `failed`
pub const FAILURES_TOTAL: &str = "jobdeck_failures_total";
/// Execution duration in seconds
pub const EXECUTION_DURATION_SECONDS: &str = "jobdeck_execution_duration_seconds";
/// Due records skipped because their job is not registered
pub const ORPHANED_SKIPPED_TOTAL: &str = "jobdeck_orphaned_skipped_total";
/// Stuck `running` records reset to `failed`
pub const STALE_RECOVERED_TOTAL: &str = "jobdeck_stale_recovered_total";
/// Claims another writer took first, or that were lost before write-back
pub const CLAIMS_LOST_TOTAL: &str = "jobdeck_claims_lost_total";
/// Executions currently in flight
pub const IN_FLIGHT: &str = "jobdeck_in_flight";
