//! Runs one job definition against a configuration and captures the outcome.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::Instant,
};

use {
    chrono::{DateTime, Utc},
    futures::FutureExt,
    serde_json::Value,
    tracing::debug,
};

use crate::{
    job::{Job, JobContext},
    types::{ExecutionResult, FailureKind, RunStatus},
};

/// Stateless runner. Never retries, never returns an error: every failure
/// becomes a `failed` [`ExecutionResult`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionEngine;

impl ExecutionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run `job` with `config_json` (stored or override) merged over its
    /// defaults. `None` or a blank string means "defaults only".
    pub async fn run(
        &self,
        job: &dyn Job,
        config_json: Option<&str>,
        ctx: &JobContext,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let timer = Instant::now();

        let config = match prepare_config(job, config_json) {
            Ok(config) => config,
            Err(message) => {
                debug!(job_id = job.id(), error = %message, "configuration rejected");
                return failed(
                    started_at,
                    timer,
                    FailureKind::Configuration,
                    message,
                    None,
                );
            },
        };

        let outcome = AssertUnwindSafe(job.execute(config, ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(out)) => ExecutionResult {
                status: if out.skipped {
                    RunStatus::Skipped
                } else {
                    RunStatus::Success
                },
                started_at,
                finished_at: Utc::now(),
                duration_seconds: timer.elapsed().as_secs_f64(),
                output: out.output,
                error: None,
                traceback: None,
                failure_kind: None,
            },
            Ok(Err(e)) => failed(
                started_at,
                timer,
                FailureKind::Execution,
                format!("{e:#}"),
                Some(format!("{e:?}")),
            ),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                failed(
                    started_at,
                    timer,
                    FailureKind::Execution,
                    format!("job panicked: {message}"),
                    Some(format!("panic in job '{}': {message}", job.id())),
                )
            },
        }
    }
}

fn failed(
    started_at: DateTime<Utc>,
    timer: Instant,
    kind: FailureKind,
    error: String,
    traceback: Option<String>,
) -> ExecutionResult {
    let error = if error.trim().is_empty() {
        "job failed without an error message".to_string()
    } else {
        error
    };
    ExecutionResult {
        status: RunStatus::Failed,
        started_at,
        finished_at: Utc::now(),
        duration_seconds: timer.elapsed().as_secs_f64(),
        output: Value::Null,
        error: Some(error),
        traceback,
        failure_kind: Some(kind),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Resolve `config_json` over the job defaults and run the job's own
/// validation. A panic in `default_config` or `validate` is reported as a
/// rejection.
pub fn prepare_config(job: &dyn Job, config_json: Option<&str>) -> Result<Value, String> {
    guarded(job, "configuration check", || {
        let config = resolve_config(job.default_config(), config_json)?;
        job.validate(&config)?;
        Ok(config)
    })
}

/// The job's default configuration, with a panic reported as an error.
pub fn default_config(job: &dyn Job) -> Result<Value, String> {
    guarded(job, "default configuration", || Ok(job.default_config()))
}

fn guarded(
    job: &dyn Job,
    what: &str,
    f: impl FnOnce() -> Result<Value, String>,
) -> Result<Value, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        Err(format!(
            "{what} of job '{}' panicked: {}",
            job.id(),
            panic_message(panic.as_ref())
        ))
    })
}

/// Parse stored configuration and merge it over the job defaults.
pub fn resolve_config(defaults: Value, config_json: Option<&str>) -> Result<Value, String> {
    let raw = match config_json.map(str::trim) {
        None | Some("") => return Ok(defaults),
        Some(raw) => raw,
    };
    let stored: Value =
        serde_json::from_str(raw).map_err(|e| format!("invalid configuration JSON: {e}"))?;
    if !stored.is_object() {
        return Err("configuration must be a JSON object".into());
    }
    let mut merged = defaults;
    merge_json(&mut merged, stored);
    Ok(merged)
}

/// Deep-merge `overlay` into `base`. Objects merge key by key, anything else
/// in `overlay` replaces the value in `base`.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value);
                    },
                    _ => {
                        base.insert(key, value);
                    },
                }
            }
        },
        (base, overlay) => *base = overlay,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use {
        super::*,
        crate::job::JobOutput,
        async_trait::async_trait,
        serde_json::json,
    };

    enum Behaviour {
        Echo,
        Fail,
        Panic,
        Skip,
    }

    struct Scripted {
        behaviour: Behaviour,
        reject: Option<&'static str>,
        validate_panics: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                reject: None,
                validate_panics: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Job for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted"
        }

        fn default_config(&self) -> Value {
            json!({ "level": 1, "options": { "debug": false, "timeout": 30 } })
        }

        fn validate(&self, _config: &Value) -> Result<(), String> {
            if self.validate_panics {
                panic!("validator bug");
            }
            match self.reject {
                Some(msg) => Err(msg.to_string()),
                None => Ok(()),
            }
        }

        async fn execute(&self, config: Value, _ctx: &JobContext) -> anyhow::Result<JobOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Echo => Ok(JobOutput::new(config)),
                Behaviour::Fail => {
                    Err(anyhow::anyhow!("disk full").context("writing backup archive"))
                },
                Behaviour::Panic => panic!("boom"),
                Behaviour::Skip => Ok(JobOutput::skipped("disabled")),
            }
        }
    }

    fn ctx() -> JobContext {
        JobContext::new("scripted", "run-1")
    }

    #[tokio::test]
    async fn success_merges_stored_config_over_defaults() {
        let job = Scripted::new(Behaviour::Echo);
        let result = ExecutionEngine
            .run(&job, Some(r#"{"level": 5, "options": {"debug": true}}"#), &ctx())
            .await;

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(
            result.output,
            json!({ "level": 5, "options": { "debug": true, "timeout": 30 } })
        );
        assert!(result.error.is_none());
        assert!(result.finished_at >= result.started_at);
        assert!(result.duration_seconds >= 0.0);
    }

    #[tokio::test]
    async fn blank_config_uses_defaults() {
        let job = Scripted::new(Behaviour::Echo);
        for raw in [None, Some(""), Some("  ")] {
            let result = ExecutionEngine.run(&job, raw, &ctx()).await;
            assert_eq!(result.output, job.default_config());
        }
    }

    #[tokio::test]
    async fn invalid_json_is_a_configuration_failure() {
        let job = Scripted::new(Behaviour::Echo);
        let result = ExecutionEngine.run(&job, Some("{not json"), &ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Configuration));
        assert!(result.error.unwrap().contains("invalid configuration JSON"));
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_object_config_rejected() {
        let job = Scripted::new(Behaviour::Echo);
        let result = ExecutionEngine.run(&job, Some("[1, 2]"), &ctx()).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_failure_short_circuits() {
        let mut job = Scripted::new(Behaviour::Echo);
        job.reject = Some("x");
        let result = ExecutionEngine.run(&job, None, &ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("x"));
        assert_eq!(result.failure_kind, Some(FailureKind::Configuration));
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_validation_is_a_configuration_failure() {
        let mut job = Scripted::new(Behaviour::Echo);
        job.validate_panics = true;
        let result = ExecutionEngine.run(&job, None, &ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Configuration));
        assert!(result.error.unwrap().contains("validator bug"));
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);

        let err = prepare_config(&job, Some("{}")).unwrap_err();
        assert!(err.contains("panicked"));
    }

    #[tokio::test]
    async fn job_error_is_captured_with_trace() {
        let job = Scripted::new(Behaviour::Fail);
        let result = ExecutionEngine.run(&job, None, &ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Execution));
        let error = result.error.unwrap();
        assert!(error.contains("writing backup archive"));
        assert!(error.contains("disk full"));
        assert!(result.traceback.unwrap().contains("disk full"));
        assert_eq!(job.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let job = Scripted::new(Behaviour::Panic);
        let result = ExecutionEngine.run(&job, None, &ctx()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.unwrap().contains("boom"));
        assert!(result.traceback.is_some());
    }

    #[tokio::test]
    async fn skipped_output_sets_status() {
        let job = Scripted::new(Behaviour::Skip);
        let result = ExecutionEngine.run(&job, None, &ctx()).await;
        assert_eq!(result.status, RunStatus::Skipped);
        assert_eq!(result.output, json!("disabled"));
    }

    #[test]
    fn merge_replaces_non_objects() {
        let mut base = json!({ "a": [1, 2], "b": { "c": 1 } });
        merge_json(&mut base, json!({ "a": [3], "b": 7 }));
        assert_eq!(base, json!({ "a": [3], "b": 7 }));
    }
}
