//! Mapping from job id to definition.

use std::{collections::HashMap, sync::Arc};

use tracing::{info, warn};

use crate::job::{Job, JobInfo};

/// Registered job definitions.
///
/// Filled during startup, then moved behind an `Arc` and shared read-only with
/// the scheduler.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. An existing definition with the same id is
    /// replaced.
    pub fn register(&mut self, job: Arc<dyn Job>) {
        let id = job.id().to_string();
        info!(job_id = %id, name = job.name(), "job registered");
        if self.jobs.insert(id.clone(), job).is_some() {
            warn!(job_id = %id, "job definition replaced an existing registration");
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All definitions, sorted by id.
    pub fn list(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self
            .jobs
            .values()
            .map(|job| JobInfo::from_job(job.as_ref()))
            .collect();
        infos.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        infos
    }
}
