//! Scheduler: poll loop, claim and dispatch, write-back, schedule management.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    tokio::{
        sync::{Mutex, Notify, Semaphore},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
    uuid::Uuid,
};

#[cfg(feature = "metrics")]
use {
    crate::metrics_names,
    metrics::{counter, gauge, histogram},
};

use crate::{
    Error, Result,
    engine::{self, ExecutionEngine, prepare_config},
    job::{Job, JobContext, JobInfo},
    registry::JobRegistry,
    schedule::{self, Schedule},
    store::ScheduleStore,
    types::{
        CycleReport, ExecutionResult, RunCompletion, RunRecord, RunStatus, RunSummary,
        ScheduleRequest, ScheduleSave, ScheduleType, ScheduleView, ScheduledJobRecord,
        SchedulerStatus, TriggerAck,
    },
};

/// Runtime knobs of the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub poll_interval: Duration,
    /// A `running` record claimed longer ago than this is reset to `failed`.
    pub stale_after: Duration,
    pub max_concurrent_jobs: usize,
    /// Character limit of the summary and traceback kept in `last_output`.
    pub output_summary_chars: usize,
    pub writeback_attempts: u32,
    pub writeback_backoff: Duration,
    /// Run history rows kept per job.
    pub history_limit: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(2 * 60 * 60),
            max_concurrent_jobs: 8,
            output_summary_chars: 500,
            writeback_attempts: 3,
            writeback_backoff: Duration::from_millis(500),
            history_limit: 50,
        }
    }
}

/// A claimed execution waiting for a worker.
struct Dispatch {
    job: Arc<dyn Job>,
    config_json: Option<String>,
    claim_id: String,
    schedule_type: ScheduleType,
    schedule_value: Option<String>,
}

/// Execution started by [`SchedulerService::trigger`].
pub struct RunHandle {
    pub job_id: String,
    pub run_id: String,
    handle: JoinHandle<ExecutionResult>,
}

impl RunHandle {
    pub fn ack(&self) -> TriggerAck {
        TriggerAck {
            status: "started".into(),
            job_id: self.job_id.clone(),
            run_id: self.run_id.clone(),
            message: format!("job '{}' started", self.job_id),
        }
    }

    /// Wait for the execution to finish. The record has been written back
    /// (or the write-back abandoned) by the time this returns.
    pub async fn wait(self) -> Result<ExecutionResult> {
        self.handle
            .await
            .map_err(|e| Error::message(format!("execution task for '{}' failed: {e}", self.job_id)))
    }
}

/// Decrements the in-flight counter when an execution task ends.
struct InFlight(Arc<SchedulerService>);

impl Drop for InFlight {
    fn drop(&mut self) {
        let previous = self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        #[cfg(feature = "metrics")]
        gauge!(metrics_names::IN_FLIGHT).set(self.0.in_flight.load(Ordering::SeqCst) as f64);
        if previous == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// The scheduler.
///
/// Owns the poll loop. Every dispatch goes through an atomic claim on the
/// store, so several loops (or processes) can share one database without
/// running a job twice.
pub struct SchedulerService {
    store: Arc<dyn ScheduleStore>,
    registry: Arc<JobRegistry>,
    engine: ExecutionEngine,
    options: SchedulerOptions,
    running: AtomicBool,
    wake_notify: Notify,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    workers: Arc<Semaphore>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        registry: Arc<JobRegistry>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(options.max_concurrent_jobs.max(1)));
        Arc::new(Self {
            store,
            registry,
            engine: ExecutionEngine::new(),
            options,
            running: AtomicBool::new(false),
            wake_notify: Notify::new(),
            loop_handle: Mutex::new(None),
            workers,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Recover stuck records and start the poll loop. A second call while
    /// running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("scheduler already running");
            return Ok(());
        }

        if let Err(e) = self.recover_stale(Utc::now()).await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.poll_loop().await;
        });
        *self.loop_handle.lock().await = Some(handle);

        info!(
            jobs = self.registry.len(),
            poll_interval_secs = self.options.poll_interval.as_secs(),
            max_concurrent_jobs = self.options.max_concurrent_jobs,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop the poll loop after its current cycle. In-flight executions keep
    /// running; use [`wait_idle`](Self::wait_idle) to drain them.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.wake_notify.notify_one();

        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "poll loop ended abnormally");
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait until no execution is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn poll_loop(self: &Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            match self.run_cycle(Utc::now()).await {
                Ok(report) if !report.dispatched.is_empty() || !report.orphaned.is_empty() => {
                    debug!(
                        checked = report.checked,
                        due = report.due,
                        dispatched = report.dispatched.len(),
                        orphaned = report.orphaned.len(),
                        "poll cycle finished"
                    );
                },
                Ok(_) => {},
                Err(e) if e.is_persistence() => {
                    warn!(error = %e, "store unavailable, poll cycle abandoned");
                },
                Err(e) => error!(error = %e, "poll cycle failed"),
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(self.options.poll_interval) => {},
                () = self.wake_notify.notified() => {
                    debug!("poll loop woken by notify");
                },
            }
        }
    }

    /// One poll cycle evaluated at `now`.
    ///
    /// Claims and dispatches every due record whose job is registered.
    /// Dispatched executions run on their own tasks; this returns without
    /// waiting for them. A store failure abandons the rest of the cycle.
    ///
    /// Stale claims are only reset by [`start`](Self::start): a record this
    /// process is still executing stays `running` however long it takes.
    pub async fn run_cycle(self: &Arc<Self>, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let candidates = self.store.list_candidates().await?;
        report.checked = candidates.len();

        for record in candidates {
            if !schedule::is_due(
                record.schedule_type,
                record.schedule_value.as_deref(),
                record.last_run,
                now,
            ) {
                continue;
            }
            report.due += 1;

            let Some(job) = self.registry.lookup(&record.job_id) else {
                warn!(job_id = %record.job_id, "due record has no registered job, skipping");
                #[cfg(feature = "metrics")]
                counter!(metrics_names::ORPHANED_SKIPPED_TOTAL).increment(1);
                report.orphaned.push(record.job_id);
                continue;
            };

            let claim_id = Uuid::new_v4().to_string();
            if !self.store.try_claim(&record.job_id, &claim_id, now).await? {
                debug!(job_id = %record.job_id, "claim taken by another poller");
                #[cfg(feature = "metrics")]
                counter!(metrics_names::CLAIMS_LOST_TOTAL).increment(1);
                report.lost_claims += 1;
                continue;
            }

            info!(
                job_id = %record.job_id,
                run_id = %claim_id,
                schedule_type = %record.schedule_type,
                "dispatching due job"
            );
            // Detached: the execution reports through the store, not the handle.
            drop(self.dispatch(Dispatch {
                job,
                config_json: Some(record.config_json),
                claim_id,
                schedule_type: record.schedule_type,
                schedule_value: record.schedule_value,
            }));
            report.dispatched.push(record.job_id);
        }

        Ok(report)
    }

    async fn recover_stale(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let cutoff = chrono::Duration::from_std(self.options.stale_after)
            .ok()
            .and_then(|stale_after| now.checked_sub_signed(stale_after))
            .ok_or_else(|| {
                Error::config(format!(
                    "stale_after of {}s is out of range",
                    self.options.stale_after.as_secs()
                ))
            })?;
        let recovered = self.store.recover_stale(cutoff, now).await?;
        for job_id in &recovered {
            warn!(job_id = %job_id, "reset stale running record to failed");
        }
        #[cfg(feature = "metrics")]
        counter!(metrics_names::STALE_RECOVERED_TOTAL).increment(recovered.len() as u64);
        Ok(recovered)
    }

    fn dispatch(self: &Arc<Self>, dispatch: Dispatch) -> JoinHandle<ExecutionResult> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        #[cfg(feature = "metrics")]
        gauge!(metrics_names::IN_FLIGHT).set(self.in_flight.load(Ordering::SeqCst) as f64);

        let guard = InFlight(Arc::clone(self));
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            // The semaphore is never closed, so a permit always arrives.
            let _permit = workers.acquire_owned().await.ok();
            let svc = Arc::clone(&guard.0);
            svc.execute(dispatch).await
        })
    }

    async fn execute(&self, dispatch: Dispatch) -> ExecutionResult {
        let job_id = dispatch.job.id().to_string();
        info!(job_id = %job_id, run_id = %dispatch.claim_id, "executing job");

        #[cfg(feature = "metrics")]
        counter!(metrics_names::EXECUTIONS_TOTAL).increment(1);

        let ctx = JobContext::new(&job_id, &dispatch.claim_id).with_pool(self.store.sql_pool());
        let result = self
            .engine
            .run(dispatch.job.as_ref(), dispatch.config_json.as_deref(), &ctx)
            .await;

        match result.status {
            RunStatus::Failed => {
                error!(
                    job_id = %job_id,
                    run_id = %dispatch.claim_id,
                    error = result.error.as_deref().unwrap_or_default(),
                    kind = ?result.failure_kind,
                    "job failed"
                );
                #[cfg(feature = "metrics")]
                counter!(metrics_names::FAILURES_TOTAL).increment(1);
            },
            status => info!(
                job_id = %job_id,
                run_id = %dispatch.claim_id,
                %status,
                duration_secs = result.duration_seconds,
                "job finished"
            ),
        }
        #[cfg(feature = "metrics")]
        histogram!(metrics_names::EXECUTION_DURATION_SECONDS).record(result.duration_seconds);

        let summary = result.summary(self.options.output_summary_chars);
        self.record_run(&job_id, &dispatch.claim_id, &result, &summary)
            .await;

        let last_output = serde_json::to_string(&summary).unwrap_or_else(|e| {
            warn!(job_id = %job_id, error = %e, "could not serialise run summary");
            String::new()
        });
        let completion = RunCompletion {
            last_run: result.finished_at,
            status: result.status,
            last_output,
            next_run: schedule::next_run(
                dispatch.schedule_type,
                dispatch.schedule_value.as_deref(),
                result.finished_at,
            ),
        };
        self.write_back(&job_id, &dispatch.claim_id, &completion).await;

        result
    }

    async fn record_run(
        &self,
        job_id: &str,
        claim_id: &str,
        result: &ExecutionResult,
        summary: &RunSummary,
    ) {
        let run = RunRecord {
            job_id: job_id.to_string(),
            claim_id: claim_id.to_string(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            status: result.status,
            duration_seconds: result.duration_seconds,
            error: summary.error.clone(),
            summary: summary.summary.clone(),
        };
        if let Err(e) = self.store.append_run(&run).await {
            warn!(job_id, error = %e, "failed to append run history");
            return;
        }
        if let Err(e) = self.store.prune_runs(job_id, self.options.history_limit).await {
            warn!(job_id, error = %e, "failed to prune run history");
        }
    }

    /// Persist the outcome, retrying transient store failures.
    ///
    /// When every attempt fails the record stays `running` until the next
    /// [`start`](Self::start) recovers it as stale.
    async fn write_back(&self, job_id: &str, claim_id: &str, completion: &RunCompletion) {
        let attempts = self.options.writeback_attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.complete_run(job_id, claim_id, completion).await {
                Ok(true) => {
                    debug!(job_id, status = %completion.status, "write-back complete");
                    return;
                },
                Ok(false) => {
                    warn!(
                        job_id,
                        run_id = claim_id,
                        "claim no longer held at write-back, result discarded"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(metrics_names::CLAIMS_LOST_TOTAL).increment(1);
                    return;
                },
                Err(e) if attempt < attempts => {
                    warn!(job_id, attempt, error = %e, "write-back failed, retrying");
                    tokio::time::sleep(self.options.writeback_backoff * attempt).await;
                },
                Err(e) => {
                    error!(
                        job_id,
                        attempts,
                        error = %e,
                        "write-back abandoned, record stays running until startup recovery"
                    );
                },
            }
        }
    }

    // ── Management operations ───────────────────────────────────────────

    /// Registered job definitions, sorted by id.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.registry.list()
    }

    /// All stored schedule records.
    pub async fn list_schedules(&self) -> Result<Vec<ScheduledJobRecord>> {
        self.store.list_records().await
    }

    /// Stored record, or the registered defaults when nothing is stored.
    pub async fn get_schedule(&self, job_id: &str) -> Result<ScheduleView> {
        if let Some(record) = self.store.get_record(job_id).await? {
            return Ok(ScheduleView::Stored(record));
        }
        let job = self
            .registry
            .lookup(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;
        let config = engine::default_config(job.as_ref()).map_err(Error::config)?;
        Ok(ScheduleView::Default {
            job_id: job.id().to_string(),
            job_name: job.name().to_string(),
            description: job.description().to_string(),
            config_json: config.to_string(),
            schedule_type: ScheduleType::Manual,
            is_active: true,
        })
    }

    /// Create or update the schedule of a registered job.
    ///
    /// The configuration must be a JSON object that passes the job's own
    /// validation once merged over its defaults. The schedule descriptor must
    /// parse. Runtime state of an existing record is kept.
    pub async fn save_schedule(
        &self,
        job_id: &str,
        request: ScheduleRequest,
    ) -> Result<ScheduledJobRecord> {
        let job = self
            .registry
            .lookup(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;

        prepare_config(job.as_ref(), Some(&request.config_json)).map_err(Error::config)?;
        Schedule::parse(request.schedule_type, request.schedule_value.as_deref())?;

        let now = Utc::now();
        let last_run = self
            .store
            .get_record(job_id)
            .await?
            .and_then(|existing| existing.last_run);
        let next_run = match (request.schedule_type, last_run) {
            (ScheduleType::Manual, _) => None,
            (_, None) => Some(now),
            (schedule_type, Some(last)) => {
                schedule::next_run(schedule_type, request.schedule_value.as_deref(), last)
            },
        };

        let record = self
            .store
            .save_schedule(&ScheduleSave {
                job_id: job_id.to_string(),
                job_name: job.name().to_string(),
                description: job.description().to_string(),
                config_json: request.config_json,
                schedule_type: request.schedule_type,
                schedule_value: request.schedule_value,
                is_active: request.is_active,
                next_run,
                updated_at: now,
            })
            .await?;

        info!(
            job_id,
            schedule_type = %record.schedule_type,
            is_active = record.is_active,
            "schedule saved"
        );
        self.wake_notify.notify_one();
        Ok(record)
    }

    /// Run a registered job now, outside its schedule.
    ///
    /// Creates a manual record with the job defaults when none exists. The
    /// execution goes through the same claim as scheduled runs, so a job that
    /// is already running is rejected. `config_override` replaces the stored
    /// configuration for this run only.
    pub async fn trigger(
        self: &Arc<Self>,
        job_id: &str,
        config_override: Option<String>,
    ) -> Result<RunHandle> {
        let job = self
            .registry
            .lookup(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;

        let now = Utc::now();
        let record = match self.store.get_record(job_id).await? {
            Some(record) => record,
            None => {
                let config = engine::default_config(job.as_ref()).map_err(Error::config)?;
                self.store
                    .save_schedule(&ScheduleSave {
                        job_id: job_id.to_string(),
                        job_name: job.name().to_string(),
                        description: job.description().to_string(),
                        config_json: config.to_string(),
                        schedule_type: ScheduleType::Manual,
                        schedule_value: None,
                        is_active: true,
                        next_run: None,
                        updated_at: now,
                    })
                    .await?
            },
        };

        let claim_id = Uuid::new_v4().to_string();
        if !self.store.try_claim(job_id, &claim_id, now).await? {
            return Err(Error::already_running(job_id));
        }

        info!(job_id, run_id = %claim_id, "job triggered");
        let handle = self.dispatch(Dispatch {
            job,
            config_json: Some(config_override.unwrap_or(record.config_json)),
            claim_id: claim_id.clone(),
            schedule_type: record.schedule_type,
            schedule_value: record.schedule_value,
        });
        Ok(RunHandle {
            job_id: job_id.to_string(),
            run_id: claim_id,
            handle,
        })
    }

    /// Remove a stored schedule. Returns whether one existed.
    pub async fn delete_schedule(&self, job_id: &str) -> Result<bool> {
        let deleted = self.store.delete_record(job_id).await?;
        if deleted {
            info!(job_id, "schedule deleted");
        }
        Ok(deleted)
    }

    /// Recent run history of a job, oldest first.
    pub async fn runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        self.store.recent_runs(job_id, limit).await
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            job_count: self.registry.len(),
            poll_interval_secs: self.options.poll_interval.as_secs(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }
}
