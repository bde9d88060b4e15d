//! In-memory store for tests and ephemeral setups.

use std::{
    cmp::Reverse,
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicI64, Ordering},
    },
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Result,
    store::{STALE_RUN_OUTPUT, ScheduleStore},
    types::{JobStatus, RunCompletion, RunRecord, ScheduleSave, ScheduledJobRecord},
};

/// In-memory store backed by a `HashMap`. No persistence.
///
/// A single mutex guards all records, which makes claim and write-back atomic
/// in the same way the SQLite conditional updates are.
pub struct InMemoryStore {
    records: Mutex<HashMap<String, ScheduledJobRecord>>,
    runs: Mutex<HashMap<String, Vec<RunRecord>>>,
    next_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn list_records(&self) -> Result<Vec<ScheduledJobRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = records.values().cloned().collect();
        list.sort_by(|a, b| {
            (!a.is_active, Reverse(a.last_run), &a.job_id).cmp(&(
                !b.is_active,
                Reverse(b.last_run),
                &b.job_id,
            ))
        });
        Ok(list)
    }

    async fn get_record(&self, job_id: &str) -> Result<Option<ScheduledJobRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(job_id).cloned())
    }

    async fn save_schedule(&self, save: &ScheduleSave) -> Result<ScheduledJobRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(save.job_id.clone())
            .or_insert_with(|| ScheduledJobRecord {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                job_id: save.job_id.clone(),
                job_name: save.job_name.clone(),
                description: save.description.clone(),
                config_json: save.config_json.clone(),
                schedule_type: save.schedule_type,
                schedule_value: save.schedule_value.clone(),
                is_active: save.is_active,
                last_run: None,
                next_run: None,
                last_status: None,
                last_output: None,
                claim_id: None,
                claimed_at: None,
                updated_at: save.updated_at,
            });
        record.job_name = save.job_name.clone();
        record.description = save.description.clone();
        record.config_json = save.config_json.clone();
        record.schedule_type = save.schedule_type;
        record.schedule_value = save.schedule_value.clone();
        record.is_active = save.is_active;
        record.next_run = save.next_run;
        record.updated_at = save.updated_at;
        Ok(record.clone())
    }

    async fn delete_record(&self, job_id: &str) -> Result<bool> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.remove(job_id).is_some())
    }

    async fn list_candidates(&self) -> Result<Vec<ScheduledJobRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = records
            .values()
            .filter(|r| r.is_candidate())
            .cloned()
            .collect();
        list.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(list)
    }

    async fn try_claim(&self, job_id: &str, claim_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = records.get_mut(job_id) else {
            return Ok(false);
        };
        if record.is_running() {
            return Ok(false);
        }
        record.last_status = Some(JobStatus::Running);
        record.claim_id = Some(claim_id.to_string());
        record.claimed_at = Some(now);
        record.updated_at = now;
        Ok(true)
    }

    async fn complete_run(
        &self,
        job_id: &str,
        claim_id: &str,
        completion: &RunCompletion,
    ) -> Result<bool> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = records.get_mut(job_id) else {
            return Ok(false);
        };
        if record.claim_id.as_deref() != Some(claim_id) {
            return Ok(false);
        }
        record.last_run = Some(completion.last_run);
        record.last_status = Some(completion.status.into());
        record.last_output = Some(completion.last_output.clone());
        record.next_run = completion.next_run;
        record.claim_id = None;
        record.claimed_at = None;
        record.updated_at = completion.last_run;
        Ok(true)
    }

    async fn recover_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut recovered = Vec::new();
        for record in records.values_mut() {
            let since = record.claimed_at.or(record.last_run);
            if record.is_running() && since.is_none_or(|t| t < cutoff) {
                record.last_status = Some(JobStatus::Failed);
                record.last_output = Some(STALE_RUN_OUTPUT.to_string());
                record.claim_id = None;
                record.claimed_at = None;
                record.updated_at = now;
                recovered.push(record.job_id.clone());
            }
        }
        recovered.sort();
        Ok(recovered)
    }

    async fn append_run(&self, run: &RunRecord) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.entry(run.job_id.clone()).or_default().push(run.clone());
        Ok(())
    }

    async fn recent_runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let records = runs.get(job_id).cloned().unwrap_or_default();
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }

    async fn prune_runs(&self, job_id: &str, keep: usize) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(records) = runs.get_mut(job_id) {
            let excess = records.len().saturating_sub(keep);
            records.drain(..excess);
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{RunStatus, ScheduleType},
        chrono::{Duration, TimeZone},
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap()
    }

    fn save(job_id: &str, schedule_type: ScheduleType) -> ScheduleSave {
        ScheduleSave {
            job_id: job_id.into(),
            job_name: format!("job-{job_id}"),
            description: String::new(),
            config_json: r#"{"a":1}"#.into(),
            schedule_type,
            schedule_value: Some("30".into()),
            is_active: true,
            next_run: None,
            updated_at: t0(),
        }
    }

    fn completion(at: DateTime<Utc>) -> RunCompletion {
        RunCompletion {
            last_run: at,
            status: RunStatus::Success,
            last_output: "{}".into(),
            next_run: Some(at + Duration::minutes(30)),
        }
    }

    #[tokio::test]
    async fn save_roundtrip_and_update_keeps_runtime_state() {
        let store = InMemoryStore::new();
        let first = store.save_schedule(&save("a", ScheduleType::Interval)).await.unwrap();
        assert!(store.try_claim("a", "c1", t0()).await.unwrap());
        assert!(store.complete_run("a", "c1", &completion(t0())).await.unwrap());

        let mut update = save("a", ScheduleType::Daily);
        update.is_active = false;
        let second = store.save_schedule(&update).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.schedule_type, ScheduleType::Daily);
        assert!(!second.is_active);
        assert_eq!(second.last_run, Some(t0()));
        assert_eq!(second.last_status, Some(JobStatus::Success));
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryStore::new();
        store.save_schedule(&save("a", ScheduleType::Interval)).await.unwrap();

        assert!(store.try_claim("a", "c1", t0()).await.unwrap());
        assert!(!store.try_claim("a", "c2", t0()).await.unwrap());
        assert!(store.list_candidates().await.unwrap().is_empty());
        assert!(!store.try_claim("missing", "c3", t0()).await.unwrap());
    }

    #[tokio::test]
    async fn completion_requires_matching_claim() {
        let store = InMemoryStore::new();
        store.save_schedule(&save("a", ScheduleType::Interval)).await.unwrap();
        store.try_claim("a", "c1", t0()).await.unwrap();

        assert!(!store.complete_run("a", "other", &completion(t0())).await.unwrap());
        assert!(store.complete_run("a", "c1", &completion(t0())).await.unwrap());
        let rec = store.get_record("a").await.unwrap().unwrap();
        assert_eq!(rec.last_status, Some(JobStatus::Success));
        assert!(rec.claim_id.is_none());
    }

    #[tokio::test]
    async fn recover_stale_only_touches_old_claims() {
        let store = InMemoryStore::new();
        store.save_schedule(&save("old", ScheduleType::Interval)).await.unwrap();
        store.save_schedule(&save("fresh", ScheduleType::Interval)).await.unwrap();
        store.try_claim("old", "c1", t0()).await.unwrap();
        store
            .try_claim("fresh", "c2", t0() + Duration::hours(3))
            .await
            .unwrap();

        let now = t0() + Duration::hours(3);
        let recovered = store
            .recover_stale(now - Duration::hours(2), now)
            .await
            .unwrap();
        assert_eq!(recovered, vec!["old".to_string()]);

        let old = store.get_record("old").await.unwrap().unwrap();
        assert_eq!(old.last_status, Some(JobStatus::Failed));
        assert!(old.is_candidate());
        let fresh = store.get_record("fresh").await.unwrap().unwrap();
        assert!(fresh.is_running());
    }

    #[tokio::test]
    async fn list_orders_active_then_recent() {
        let store = InMemoryStore::new();
        let mut inactive = save("z", ScheduleType::Daily);
        inactive.is_active = false;
        store.save_schedule(&inactive).await.unwrap();
        store.save_schedule(&save("a", ScheduleType::Daily)).await.unwrap();
        store.save_schedule(&save("b", ScheduleType::Daily)).await.unwrap();
        store.try_claim("b", "c", t0()).await.unwrap();
        store.complete_run("b", "c", &completion(t0())).await.unwrap();

        let ids: Vec<_> = store
            .list_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.job_id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "z"]);
    }

    #[tokio::test]
    async fn runs_are_bounded() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .append_run(&RunRecord {
                    job_id: "j1".into(),
                    claim_id: format!("c{i}"),
                    started_at: t0() + Duration::minutes(i),
                    finished_at: t0() + Duration::minutes(i),
                    status: RunStatus::Success,
                    duration_seconds: 0.5,
                    error: None,
                    summary: None,
                })
                .await
                .unwrap();
        }
        store.prune_runs("j1", 3).await.unwrap();
        let runs = store.recent_runs("j1", 10).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].claim_id, "c2");
        assert!(store.recent_runs("none", 10).await.unwrap().is_empty());
    }
}
