use {
    async_trait::async_trait,
    jobdeck_scheduler::job::{Job, JobContext, JobOutput},
    serde_json::{Value, json},
    tracing::debug,
};

const MAX_REPEAT: i64 = 1000;

/// Repeats a message. Handy for checking that schedules fire.
pub struct EchoJob;

#[async_trait]
impl Job for EchoJob {
    fn id(&self) -> &str {
        "echo"
    }

    fn name(&self) -> &str {
        "Echo"
    }

    fn description(&self) -> &str {
        "Returns the configured message, repeated"
    }

    fn default_config(&self) -> Value {
        json!({ "enabled": true, "message": "hello", "repeat": 1 })
    }

    fn validate(&self, config: &Value) -> Result<(), String> {
        if !config["message"].is_string() {
            return Err("message must be a string".into());
        }
        if !config["enabled"].is_boolean() {
            return Err("enabled must be a boolean".into());
        }
        match config["repeat"].as_i64() {
            Some(n) if (0..=MAX_REPEAT).contains(&n) => Ok(()),
            Some(n) if n < 0 => Err(format!("repeat must not be negative, got {n}")),
            Some(n) => Err(format!("repeat must be at most {MAX_REPEAT}, got {n}")),
            None => Err("repeat must be an integer".into()),
        }
    }

    async fn execute(&self, config: Value, ctx: &JobContext) -> anyhow::Result<JobOutput> {
        if config["enabled"] == Value::Bool(false) {
            return Ok(JobOutput::skipped(json!({ "reason": "disabled" })));
        }
        let message = config["message"].as_str().unwrap_or_default();
        let repeat = usize::try_from(config["repeat"].as_i64().unwrap_or(1))?;
        debug!(run_id = %ctx.run_id, repeat, "echoing");
        Ok(JobOutput::new(json!({
            "lines": vec![message; repeat],
            "count": repeat,
        })))
    }
}
