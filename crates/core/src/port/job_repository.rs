// Job Repository Port

use async_trait::async_trait;

use crate::domain::{FailureKind, Job, JobId, JobStatus};
use crate::error::Result;

/// Persistence interface for jobs
///
/// Terminal updates (`mark_completed`, `mark_failed`) are conditional: they
/// must not overwrite a job that is already Completed or Failed, and return
/// `AppError::InvalidState` when the guard rejects the write. Concurrent
/// writers (executor poll task vs reconciler sweep) rely on this.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// Queued -> Processing with the provider handle. Fails with
    /// `InvalidState` when the job is not Queued anymore.
    async fn set_processing(&self, id: &str, provider_handle: &str, now_millis: i64)
        -> Result<()>;

    async fn set_progress(&self, id: &str, percent: i32, now_millis: i64) -> Result<()>;

    /// Terminal: Processing/Queued -> Completed. Guarded against terminal
    /// states.
    async fn mark_completed(
        &self,
        id: &str,
        result_uri: Option<&str>,
        now_millis: i64,
    ) -> Result<()>;

    /// Terminal: any non-terminal -> Failed. Guarded against terminal states.
    async fn mark_failed(
        &self,
        id: &str,
        kind: FailureKind,
        message: &str,
        now_millis: i64,
    ) -> Result<()>;

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// Processing jobs that hold a provider handle (drift sweep input)
    async fn find_processing_with_handle(&self) -> Result<Vec<Job>>;

    /// Processing jobs without a handle, created before the cutoff. These
    /// never reached the provider.
    async fn find_stuck_without_handle(&self, cutoff_millis: i64) -> Result<Vec<Job>>;

    /// Queued jobs created before the cutoff
    async fn find_queued_older_than(&self, cutoff_millis: i64) -> Result<Vec<Job>>;

    async fn count_by_status(&self, status: JobStatus) -> Result<u64>;

    async fn count_created_since(&self, cutoff_millis: i64) -> Result<u64>;

    /// Delete terminal jobs in the given status older than the cutoff.
    /// Returns rows removed.
    async fn purge_terminal_older_than(&self, status: JobStatus, cutoff_millis: i64)
        -> Result<u64>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory repository mirroring the conditional-update semantics of
    /// the SQL implementation.
    pub struct MemoryJobRepository {
        jobs: Mutex<HashMap<JobId, Job>>,
    }

    impl MemoryJobRepository {
        pub fn new() -> Self {
            Self {
                jobs: Mutex::new(HashMap::new()),
            }
        }
    }

    impl Default for MemoryJobRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl JobRepository for MemoryJobRepository {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("job already exists: {}", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn set_processing(
            &self,
            id: &str,
            provider_handle: &str,
            now_millis: i64,
        ) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("job not found: {id}")))?;
            if job.status != JobStatus::Queued {
                return Err(AppError::InvalidState(format!(
                    "job {id} is {}, expected QUEUED",
                    job.status
                )));
            }
            job.status = JobStatus::Processing;
            job.provider_handle = Some(provider_handle.to_string());
            job.updated_at = now_millis;
            Ok(())
        }

        async fn set_progress(&self, id: &str, percent: i32, now_millis: i64) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("job not found: {id}")))?;
            if !job.status.is_terminal() {
                job.progress_percent = percent;
                job.updated_at = now_millis;
            }
            Ok(())
        }

        async fn mark_completed(
            &self,
            id: &str,
            result_uri: Option<&str>,
            now_millis: i64,
        ) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("job not found: {id}")))?;
            if job.status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "job {id} already terminal: {}",
                    job.status
                )));
            }
            job.status = JobStatus::Completed;
            job.result_uri = result_uri.map(|s| s.to_string());
            job.progress_percent = 100;
            job.completed_at = Some(now_millis);
            job.updated_at = now_millis;
            Ok(())
        }

        async fn mark_failed(
            &self,
            id: &str,
            kind: FailureKind,
            message: &str,
            now_millis: i64,
        ) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("job not found: {id}")))?;
            if job.status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "job {id} already terminal: {}",
                    job.status
                )));
            }
            job.status = JobStatus::Failed;
            job.error_kind = Some(kind);
            job.error_message = Some(message.to_string());
            job.failed_at = Some(now_millis);
            job.updated_at = now_millis;
            Ok(())
        }

        async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
            let mut jobs: Vec<Job> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.status == status)
                .cloned()
                .collect();
            jobs.sort_by_key(|j| j.created_at);
            Ok(jobs)
        }

        async fn find_processing_with_handle(&self) -> Result<Vec<Job>> {
            let mut jobs: Vec<Job> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.status == JobStatus::Processing && j.provider_handle.is_some())
                .cloned()
                .collect();
            jobs.sort_by_key(|j| j.created_at);
            Ok(jobs)
        }

        async fn find_stuck_without_handle(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
            let mut jobs: Vec<Job> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| {
                    j.status == JobStatus::Processing
                        && j.provider_handle.is_none()
                        && j.created_at < cutoff_millis
                })
                .cloned()
                .collect();
            jobs.sort_by_key(|j| j.created_at);
            Ok(jobs)
        }

        async fn find_queued_older_than(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
            let mut jobs: Vec<Job> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.status == JobStatus::Queued && j.created_at < cutoff_millis)
                .cloned()
                .collect();
            jobs.sort_by_key(|j| j.created_at);
            Ok(jobs)
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<u64> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.status == status)
                .count() as u64)
        }

        async fn count_created_since(&self, cutoff_millis: i64) -> Result<u64> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.created_at >= cutoff_millis)
                .count() as u64)
        }

        async fn purge_terminal_older_than(
            &self,
            status: JobStatus,
            cutoff_millis: i64,
        ) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|_, j| {
                !(j.status == status
                    && j.status.is_terminal()
                    && j.updated_at < cutoff_millis)
            });
            Ok((before - jobs.len()) as u64)
        }
    }
}
