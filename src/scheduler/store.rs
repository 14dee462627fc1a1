use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ForgeError, JobError};
use crate::scheduler::admission::AdmissionController;
use crate::scheduler::job::{AppSpec, Job, JobResult, JobStatus, JobView};

/// Why a worker's state update was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    NotFound,
    /// The job was cancelled (or otherwise ended) underneath the worker.
    Terminal(JobStatus),
    Invalid { from: JobStatus, to: JobStatus },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::NotFound => write!(f, "job no longer exists"),
            TransitionError::Terminal(status) => write!(f, "job already {}", status),
            TransitionError::Invalid { from, to } => {
                write!(f, "illegal transition {} -> {}", from, to)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Cancelling a finished job is a no-op.
    AlreadyTerminal(JobStatus),
}

/// Handle given to the worker of a freshly admitted job.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub job_id: Uuid,
    pub artifact_root: PathBuf,
    pub spec: AppSpec,
    pub cancel: CancellationToken,
    pub view: JobView,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub in_progress: usize,
    pub builds_succeeded: usize,
    pub success_rate: f64,
    pub avg_generation_secs: f64,
}

#[derive(Debug)]
struct Entry {
    job: Job,
    cancel: CancellationToken,
}

/// In-memory table of job state, the source of truth for status polling.
///
/// Shared as `Arc<RwLock<JobStore>>`; every method runs inside one lock
/// acquisition, which is what makes admission check-and-reserve atomic.
#[derive(Debug)]
pub struct JobStore {
    jobs: HashMap<Uuid, Entry>,
    admission: AdmissionController,
    storage_root: PathBuf,
}

impl JobStore {
    pub fn new(storage_root: impl Into<PathBuf>, max_concurrent_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            admission: AdmissionController::new(max_concurrent_jobs),
            storage_root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Admit a validated spec, or reject it without touching any state.
    pub fn submit(
        &mut self,
        spec: AppSpec,
        parent: &CancellationToken,
    ) -> Result<Admitted, ForgeError> {
        let job = Job::new(spec, &self.storage_root);
        self.admission
            .try_reserve(job.id)
            .map_err(|queue_position| ForgeError::AdmissionRejected { queue_position })?;

        let cancel = parent.child_token();
        let admitted = Admitted {
            job_id: job.id,
            artifact_root: job.artifact_root.clone(),
            spec: job.spec.clone(),
            cancel: cancel.clone(),
            view: JobView::from(&job),
        };
        tracing::info!(job_id = %job.id, active = self.admission.active_count(), "Job admitted");
        self.jobs.insert(job.id, Entry { job, cancel });
        Ok(admitted)
    }

    pub fn get(&self, id: &Uuid) -> Option<JobView> {
        self.jobs.get(id).map(|e| JobView::from(&e.job))
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id).map(|e| &e.job)
    }

    pub fn get_job_mut(&mut self, id: &Uuid) -> Option<&mut Job> {
        self.jobs.get_mut(id).map(|e| &mut e.job)
    }

    pub fn cancel(&mut self, id: &Uuid) -> Result<CancelOutcome, ForgeError> {
        let entry = self.jobs.get_mut(id).ok_or(ForgeError::JobNotFound(*id))?;
        if entry.job.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(entry.job.status));
        }
        entry.job.status = JobStatus::Cancelled;
        entry.job.current_step = JobStatus::Cancelled.step_label().to_string();
        entry.job.finished_at = Some(Utc::now());
        entry.cancel.cancel();
        self.admission.release(id);
        tracing::info!(job_id = %id, "Job cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Move a running job onto its next stage.
    pub fn advance(&mut self, id: &Uuid, next: JobStatus) -> Result<(), TransitionError> {
        let job = self.live_job_mut(id)?;
        if next.is_terminal() || !job.status.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        job.current_step = next.step_label().to_string();
        job.steps_completed = next.rank().saturating_sub(1);
        tracing::debug!(job_id = %id, stage = %next, "Stage started");
        Ok(())
    }

    /// Record partial progress inside the current stage. Progress never moves
    /// backwards and never passes the current stage's checkpoint.
    pub fn report_progress(&mut self, id: &Uuid, progress: u8) -> Result<(), TransitionError> {
        let job = self.live_job_mut(id)?;
        let cap = job.status.checkpoint().unwrap_or(100);
        job.progress = job.progress.max(progress.min(cap));
        Ok(())
    }

    /// Mark the current stage as finished.
    pub fn finish_stage(&mut self, id: &Uuid) -> Result<(), TransitionError> {
        let job = self.live_job_mut(id)?;
        if let Some(cp) = job.status.checkpoint() {
            job.progress = job.progress.max(cp);
        }
        job.steps_completed = job.status.rank();
        Ok(())
    }

    /// Finish the job. A failed build still completes; its error rides along.
    pub fn complete(
        &mut self,
        id: &Uuid,
        result: JobResult,
        build_error: Option<JobError>,
    ) -> Result<(), TransitionError> {
        let job = self.live_job_mut(id)?;
        if !job.status.can_transition_to(JobStatus::Completed) {
            return Err(TransitionError::Invalid {
                from: job.status,
                to: JobStatus::Completed,
            });
        }
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.steps_completed = crate::scheduler::job::TOTAL_STEPS;
        job.current_step = JobStatus::Completed.step_label().to_string();
        job.result = Some(result);
        job.error = build_error;
        job.finished_at = Some(Utc::now());
        self.admission.release(id);
        Ok(())
    }

    pub fn fail(&mut self, id: &Uuid, error: JobError) -> Result<(), TransitionError> {
        let job = self.live_job_mut(id)?;
        job.status = JobStatus::Failed;
        job.current_step = JobStatus::Failed.step_label().to_string();
        job.error = Some(error);
        job.finished_at = Some(Utc::now());
        self.admission.release(id);
        Ok(())
    }

    fn live_job_mut(&mut self, id: &Uuid) -> Result<&mut Job, TransitionError> {
        let job = self
            .jobs
            .get_mut(id)
            .map(|e| &mut e.job)
            .ok_or(TransitionError::NotFound)?;
        if job.is_terminal() {
            return Err(TransitionError::Terminal(job.status));
        }
        Ok(job)
    }

    /// Terminal jobs whose terminal timestamp is older than `cutoff`.
    pub fn expired(&self, cutoff: DateTime<Utc>) -> Vec<(Uuid, PathBuf)> {
        self.jobs
            .values()
            .filter(|e| e.job.is_terminal())
            .filter(|e| e.job.finished_at.is_some_and(|t| t < cutoff))
            .map(|e| (e.job.id, e.job.artifact_root.clone()))
            .collect()
    }

    /// Drop a terminal job's record. Running jobs are never removed.
    pub fn remove_terminal(&mut self, id: &Uuid) -> Option<Job> {
        match self.jobs.get(id) {
            Some(e) if e.job.is_terminal() => self.jobs.remove(id).map(|e| e.job),
            _ => None,
        }
    }

    /// Location of the built package, if the job produced one.
    pub fn artifact_path(&self, id: &Uuid) -> Result<PathBuf, ForgeError> {
        let job = self.get_job(id).ok_or(ForgeError::JobNotFound(*id))?;
        job.result
            .as_ref()
            .and_then(|r| r.artifact_path.clone())
            .ok_or(ForgeError::ArtifactNotFound(*id))
    }

    /// All jobs, oldest first.
    pub fn all_jobs(&self) -> Vec<JobView> {
        let mut jobs: Vec<&Job> = self.jobs.values().map(|e| &e.job).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs.into_iter().map(JobView::from).collect()
    }

    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats {
            total: self.jobs.len(),
            in_progress: self.admission.active_count(),
            ..Default::default()
        };
        let mut generation_total = 0.0;
        for entry in self.jobs.values() {
            match entry.job.status {
                JobStatus::Completed => {
                    stats.completed += 1;
                    if let Some(result) = &entry.job.result {
                        generation_total += result.generation_secs;
                        if result.build_succeeded {
                            stats.builds_succeeded += 1;
                        }
                    }
                }
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                _ => {}
            }
        }
        if stats.total > 0 {
            stats.success_rate = stats.completed as f64 / stats.total as f64 * 100.0;
        }
        if stats.completed > 0 {
            stats.avg_generation_secs = generation_total / stats.completed as f64;
        }
        stats
    }

    pub fn active_count(&self) -> usize {
        self.admission.active_count()
    }

    pub fn is_active(&self, id: &Uuid) -> bool {
        self.admission.is_active(id)
    }

    pub fn ceiling(&self) -> usize {
        self.admission.ceiling()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
