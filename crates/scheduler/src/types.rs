//! Core data types for the job scheduler.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::Error;

/// Recurrence kind of a schedule record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    /// Only runs when explicitly triggered.
    #[default]
    Manual,
    /// Every `schedule_value` minutes.
    Interval,
    /// Cron expression in `schedule_value`.
    Cron,
    /// Every 24 hours after the last run.
    Daily,
    /// Every 7 days after the last run.
    Weekly,
}

impl ScheduleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Interval => "interval",
            Self::Cron => "cron",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    /// Whether `schedule_value` carries meaning for this type.
    pub fn needs_value(self) -> bool {
        matches!(self, Self::Interval | Self::Cron)
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "interval" => Ok(Self::Interval),
            "cron" => Ok(Self::Cron),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(Error::schedule(format!("unknown schedule type: {other}"))),
        }
    }
}

/// Outcome of a single execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(Error::message(format!("unknown run status: {other}"))),
        }
    }
}

/// `last_status` of a schedule record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Claimed by an execution that has not written back yet.
    Running,
    Success,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl From<RunStatus> for JobStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => Self::Success,
            RunStatus::Failed => Self::Failed,
            RunStatus::Skipped => Self::Skipped,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            other => other.parse::<RunStatus>().map(Self::from),
        }
    }
}

/// Persisted schedule and last outcome of one job (`scheduled_jobs` row).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledJobRecord {
    pub id: i64,
    pub job_id: String,
    pub job_name: String,
    pub description: String,
    pub config_json: String,
    pub schedule_type: ScheduleType,
    pub schedule_value: Option<String>,
    pub is_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
    pub last_output: Option<String>,
    /// Token of the execution currently holding the claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJobRecord {
    pub fn is_running(&self) -> bool {
        self.last_status == Some(JobStatus::Running)
    }

    /// Active, scheduled (not manual) and not currently claimed.
    pub fn is_candidate(&self) -> bool {
        self.is_active && self.schedule_type != ScheduleType::Manual && !self.is_running()
    }
}

/// Upsert of the user-editable columns of a schedule record.
///
/// Runtime columns (`last_run`, `last_status`, `last_output`, claim) are left
/// untouched on update.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSave {
    pub job_id: String,
    pub job_name: String,
    pub description: String,
    pub config_json: String,
    pub schedule_type: ScheduleType,
    pub schedule_value: Option<String>,
    pub is_active: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Write-back applied when an execution finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub last_run: DateTime<Utc>,
    pub status: RunStatus,
    pub last_output: String,
    pub next_run: Option<DateTime<Utc>>,
}

/// Row of the bounded run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub job_id: String,
    pub claim_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Which stage produced a failed result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Malformed configuration JSON or failed validation.
    Configuration,
    /// The job body returned an error or panicked.
    Execution,
}

/// Result of one engine run. Never persisted whole; see [`RunSummary`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

impl ExecutionResult {
    /// Bounded summary stored in `last_output`.
    pub fn summary(&self, max_chars: usize) -> RunSummary {
        let summary = match &self.output {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(truncate_chars(s, max_chars)),
            other => Some(truncate_chars(&other.to_string(), max_chars)),
        };
        RunSummary {
            status: self.status,
            finished_at: self.finished_at,
            duration_seconds: self.duration_seconds,
            summary,
            error: self.error.as_deref().map(|e| truncate_chars(e, max_chars)),
            traceback: self
                .traceback
                .as_deref()
                .map(|t| truncate_chars(t, max_chars)),
        }
    }
}

/// JSON document written to `last_output`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Cut `s` to at most `max_chars` characters, never splitting a char.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Input of the save-schedule operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default = "default_config_json")]
    pub config_json: String,
    #[serde(default)]
    pub schedule_type: ScheduleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_value: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_config_json() -> String {
    "{}".into()
}

fn default_true() -> bool {
    true
}

/// What get-schedule returns: the stored record, or the defaults of a
/// registered job that has never been saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ScheduleView {
    Stored(ScheduledJobRecord),
    Default {
        job_id: String,
        job_name: String,
        description: String,
        config_json: String,
        schedule_type: ScheduleType,
        is_active: bool,
    },
}

/// Immediate answer of a trigger: the execution is claimed and started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerAck {
    pub status: String,
    pub job_id: String,
    pub run_id: String,
    pub message: String,
}

/// Scheduler run state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub running: bool,
    pub job_count: usize,
    pub poll_interval_secs: u64,
    pub in_flight: usize,
}

/// What one poll cycle did.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub due: usize,
    pub dispatched: Vec<String>,
    pub orphaned: Vec<String>,
    pub lost_claims: usize,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone, rstest::rstest};

    #[rstest]
    #[case("manual", ScheduleType::Manual)]
    #[case("interval", ScheduleType::Interval)]
    #[case("CRON", ScheduleType::Cron)]
    #[case(" daily ", ScheduleType::Daily)]
    #[case("weekly", ScheduleType::Weekly)]
    fn schedule_type_parses(#[case] input: &str, #[case] expected: ScheduleType) {
        assert_eq!(input.parse::<ScheduleType>().unwrap(), expected);
    }

    #[test]
    fn schedule_type_rejects_unknown() {
        assert!("hourly".parse::<ScheduleType>().is_err());
    }

    #[test]
    fn job_status_covers_run_statuses() {
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!("skipped".parse::<JobStatus>().unwrap(), JobStatus::Skipped);
        assert!("queued".parse::<JobStatus>().is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn summary_bounds_output_and_drops_payload() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let result = ExecutionResult {
            status: RunStatus::Success,
            started_at: at,
            finished_at: at,
            duration_seconds: 0.25,
            output: serde_json::Value::String("x".repeat(800)),
            error: None,
            traceback: None,
            failure_kind: None,
        };
        let summary = result.summary(500);
        assert_eq!(summary.summary.unwrap().len(), 500);
        assert_eq!(summary.status, RunStatus::Success);

        let json = serde_json::to_value(result.summary(10)).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());

        let failed = ExecutionResult {
            status: RunStatus::Failed,
            output: serde_json::Value::Null,
            error: Some("e".repeat(100_000)),
            traceback: Some("t".repeat(100_000)),
            failure_kind: Some(FailureKind::Execution),
            ..result
        };
        let summary = failed.summary(500);
        assert_eq!(summary.error.unwrap().len(), 500);
        assert_eq!(summary.traceback.unwrap().len(), 500);
        assert!(summary.summary.is_none());
    }

    #[test]
    fn schedule_request_defaults() {
        let req: ScheduleRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.config_json, "{}");
        assert_eq!(req.schedule_type, ScheduleType::Manual);
        assert!(req.is_active);
    }

    #[test]
    fn candidate_excludes_manual_inactive_and_running() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut rec = ScheduledJobRecord {
            id: 1,
            job_id: "a".into(),
            job_name: "A".into(),
            description: String::new(),
            config_json: "{}".into(),
            schedule_type: ScheduleType::Interval,
            schedule_value: Some("5".into()),
            is_active: true,
            last_run: None,
            next_run: None,
            last_status: None,
            last_output: None,
            claim_id: None,
            claimed_at: None,
            updated_at: at,
        };
        assert!(rec.is_candidate());
        rec.last_status = Some(JobStatus::Running);
        assert!(!rec.is_candidate());
        rec.last_status = Some(JobStatus::Failed);
        rec.schedule_type = ScheduleType::Manual;
        assert!(!rec.is_candidate());
        rec.schedule_type = ScheduleType::Daily;
        rec.is_active = false;
        assert!(!rec.is_candidate());
    }
}
