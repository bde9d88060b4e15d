use std::sync::Arc;

use {
    clap::Args,
    jobdeck_scheduler::{
        Error,
        service::SchedulerService,
        types::{ScheduleRequest, ScheduleType},
    },
    serde::Serialize,
    serde_json::json,
};

/// Arguments of `jobdeck save`.
#[derive(Args, Debug)]
pub struct SaveArgs {
    pub job_id: String,
    /// manual, interval, cron, daily or weekly.
    #[arg(long, default_value = "manual")]
    pub schedule: ScheduleType,
    /// Minutes for `interval`, expression for `cron`.
    #[arg(long)]
    pub value: Option<String>,
    /// Job configuration as a JSON object.
    #[arg(long, default_value = "{}")]
    pub config: String,
    /// Store the schedule without enabling it.
    #[arg(long, default_value_t = false)]
    pub inactive: bool,
}

impl SaveArgs {
    fn into_request(self) -> (String, ScheduleRequest) {
        (self.job_id, ScheduleRequest {
            config_json: self.config,
            schedule_type: self.schedule,
            schedule_value: self.value,
            is_active: !self.inactive,
        })
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn handle_jobs(svc: &SchedulerService) -> anyhow::Result<()> {
    print_json(&svc.list_jobs())
}

pub async fn handle_list(svc: &SchedulerService) -> anyhow::Result<()> {
    print_json(&svc.list_schedules().await?)
}

pub async fn handle_show(svc: &SchedulerService, job_id: &str) -> anyhow::Result<()> {
    print_json(&svc.get_schedule(job_id).await?)
}

pub async fn handle_save(svc: &SchedulerService, args: SaveArgs) -> anyhow::Result<()> {
    let (job_id, request) = args.into_request();
    print_json(&svc.save_schedule(&job_id, request).await?)
}

/// Trigger and wait, printing the acknowledgement and then the result.
pub async fn handle_trigger(
    svc: &Arc<SchedulerService>,
    job_id: &str,
    config: Option<String>,
) -> anyhow::Result<()> {
    let handle = svc.trigger(job_id, config).await?;
    print_json(&handle.ack())?;
    let result = handle.wait().await?;
    print_json(&result)
}

pub async fn handle_delete(svc: &SchedulerService, job_id: &str) -> anyhow::Result<()> {
    if !svc.delete_schedule(job_id).await? {
        return Err(Error::record_not_found(job_id).into());
    }
    print_json(&json!({ "job_id": job_id, "deleted": true }))
}

pub async fn handle_runs(svc: &SchedulerService, job_id: &str, limit: usize) -> anyhow::Result<()> {
    print_json(&svc.runs(job_id, limit).await?)
}

pub async fn handle_status(svc: &SchedulerService) -> anyhow::Result<()> {
    let records = svc.list_schedules().await?;
    let active = records.iter().filter(|r| r.is_active).count();
    let running: Vec<_> = records
        .iter()
        .filter(|r| r.is_running())
        .map(|r| r.job_id.as_str())
        .collect();
    print_json(&json!({
        "scheduler": svc.status(),
        "schedules": records.len(),
        "active": active,
        "running": running,
    }))
}
