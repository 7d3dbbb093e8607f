//! Background invalidation jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use readshelf_cache::CacheManager;

use crate::schedule::CleanupSchedule;
use crate::SchedulerError;

/// A registered cleanup job: when to fire and what to invalidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupJob {
    pub name: String,
    pub schedule: CleanupSchedule,
    /// Namespace whose version is bumped on each run.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Glob patterns cleared on each run.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Tags invalidated on each run.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Disabled jobs keep their slot and timer but skip execution.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Per-kind counts from one cleanup run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupOutcome {
    pub namespace_bumped: bool,
    pub pattern_keys: u64,
    pub tag_keys: u64,
}

/// Snapshot of one job for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub schedule: CleanupSchedule,
    pub enabled: bool,
    pub next_run: chrono::DateTime<Utc>,
}

struct JobHandle {
    job: CleanupJob,
    enabled: watch::Sender<bool>,
    /// Deadline the timer task is currently sleeping towards.
    next_run: watch::Receiver<DateTime<Utc>>,
    task: JoinHandle<()>,
}

/// Runs registered cleanup jobs on tokio tasks.
///
/// Each job loops: sleep until the schedule's next occurrence, execute if
/// enabled, re-arm. A run that invalidates nothing (or fails fail-open in
/// the manager) never cancels future runs.
pub struct InvalidationScheduler {
    manager: Arc<CacheManager>,
    jobs: DashMap<String, JobHandle>,
}

impl InvalidationScheduler {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self {
            manager,
            jobs: DashMap::new(),
        }
    }

    /// Validate and register a job, spawning its timer task. Configuration
    /// problems surface here, synchronously, before anything is scheduled.
    pub fn register(&self, job: CleanupJob) -> Result<(), SchedulerError> {
        job.schedule.validate()?;
        if job.name.is_empty() {
            return Err(SchedulerError::InvalidConfiguration(
                "job name must not be empty".into(),
            ));
        }
        if self.jobs.contains_key(&job.name) {
            return Err(SchedulerError::DuplicateJob(job.name));
        }

        let (enabled_tx, enabled_rx) = watch::channel(job.enabled);
        let (next_tx, next_rx) = watch::channel(job.schedule.next_occurrence(Utc::now()));
        let task = tokio::spawn(run_job_loop(
            Arc::clone(&self.manager),
            job.clone(),
            enabled_rx,
            next_tx,
        ));
        tracing::info!(job = %job.name, schedule = ?job.schedule, "cleanup job registered");
        self.jobs.insert(
            job.name.clone(),
            JobHandle {
                job,
                enabled: enabled_tx,
                next_run: next_rx,
                task,
            },
        );
        Ok(())
    }

    pub fn enable(&self, name: &str) -> Result<(), SchedulerError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), SchedulerError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut handle = self
            .jobs
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_owned()))?;
        handle.job.enabled = enabled;
        // Receiver only drops when the task dies; either way the job state
        // above is authoritative.
        let _ = handle.enabled.send(enabled);
        tracing::info!(job = %name, enabled, "cleanup job toggled");
        Ok(())
    }

    /// Execute a job immediately, exactly once, regardless of its enabled
    /// flag. The job's timer keeps its own cadence.
    pub async fn run_now(&self, name: &str) -> Result<CleanupOutcome, SchedulerError> {
        let job = self
            .jobs
            .get(name)
            .map(|h| h.job.clone())
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_owned()))?;
        Ok(execute(&self.manager, &job).await)
    }

    /// Unregister a job and stop its timer task.
    pub fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        let (_, handle) = self
            .jobs
            .remove(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_owned()))?;
        handle.task.abort();
        tracing::info!(job = %name, "cleanup job removed");
        Ok(())
    }

    /// Snapshot of all registered jobs.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self
            .jobs
            .iter()
            .map(|entry| JobInfo {
                name: entry.job.name.clone(),
                schedule: entry.job.schedule.clone(),
                enabled: entry.job.enabled,
                next_run: *entry.next_run.borrow(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

impl Drop for InvalidationScheduler {
    fn drop(&mut self) {
        for entry in self.jobs.iter() {
            entry.task.abort();
        }
    }
}

async fn run_job_loop(
    manager: Arc<CacheManager>,
    job: CleanupJob,
    enabled: watch::Receiver<bool>,
    next_run: watch::Sender<DateTime<Utc>>,
) {
    loop {
        let next = job.schedule.next_occurrence(Utc::now());
        let _ = next_run.send(next);
        let wait = (next - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        if *enabled.borrow() {
            let outcome = execute(&manager, &job).await;
            tracing::info!(
                job = %job.name,
                namespace_bumped = outcome.namespace_bumped,
                pattern_keys = outcome.pattern_keys,
                tag_keys = outcome.tag_keys,
                "cleanup job ran"
            );
        } else {
            tracing::debug!(job = %job.name, "cleanup job skipped, disabled");
        }
    }
}

/// Apply a job's invalidation rules through the manager. Every strategy is
/// best-effort; nothing here returns an error.
pub async fn execute(manager: &CacheManager, job: &CleanupJob) -> CleanupOutcome {
    let mut outcome = CleanupOutcome::default();
    if let Some(namespace) = &job.namespace {
        outcome.namespace_bumped = manager.invalidate_namespace(namespace).await.is_some();
    }
    for pattern in &job.patterns {
        outcome.pattern_keys += manager.clear_pattern(pattern, None).await;
    }
    if !job.tags.is_empty() {
        outcome.tag_keys = manager.invalidate_by_tags(&job.tags).await;
    }
    outcome
}
