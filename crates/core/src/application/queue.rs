// Admission queue
//
// Every submission is persisted first, then either handed to the executor
// immediately (rate limit permitting) or parked in a FIFO overflow queue.
// The drain loop releases parked entries in order as quota recovers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::application::executor::OperationExecutor;
use crate::application::rate_limit::{DenialReason, RateLimiter};
use crate::application::shutdown::ShutdownToken;
use crate::domain::{FailureKind, Job, JobId, JobPayload, JobStatus, OperationClass};
use crate::error::Result;
use crate::port::{IdProvider, JobRepository, TimeProvider};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Per-entry wait estimate shown to callers, in seconds
    pub spacing_seconds: i64,
    /// Drain loop sleep when the queue is empty
    pub idle_sleep_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            spacing_seconds: 6,
            idle_sleep_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub operation_class: OperationClass,
    pub payload: serde_json::Value,
}

/// What the caller learns about their submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub job_id: JobId,
    pub admitted_immediately: bool,
    /// 1-based position among parked entries; 0 when admitted immediately
    pub queue_position: usize,
    pub estimated_wait_seconds: i64,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub estimated_drain_seconds: i64,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    job_id: JobId,
    operation_class: OperationClass,
    enqueued_at: i64,
}

pub struct JobQueue {
    job_repo: Arc<dyn JobRepository>,
    rate_limiter: Arc<RateLimiter>,
    executor: Arc<OperationExecutor>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    entries: Mutex<VecDeque<QueueEntry>>,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        rate_limiter: Arc<RateLimiter>,
        executor: Arc<OperationExecutor>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: QueueConfig,
    ) -> Self {
        Self {
            job_repo,
            rate_limiter,
            executor,
            id_provider,
            time_provider,
            entries: Mutex::new(VecDeque::new()),
            config,
        }
    }

    /// Accept a submission. Always persists the job; never drops work.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        let now = self.time_provider.now_millis();
        let job_id = self.id_provider.generate();
        let job = Job::new(
            job_id.clone(),
            now,
            request.operation_class,
            JobPayload::new(request.payload),
        );
        self.job_repo.insert(&job).await?;

        let verdict = self.rate_limiter.can_proceed(request.operation_class);
        if verdict.allowed {
            self.rate_limiter.record_request(request.operation_class);
            self.executor.spawn(job);
            debug!(job_id = %job_id, class = %request.operation_class, "Job admitted immediately");
            return Ok(SubmitOutcome {
                job_id,
                admitted_immediately: true,
                queue_position: 0,
                estimated_wait_seconds: 0,
                denial_reason: None,
            });
        }

        let position = {
            let mut entries = self.entries.lock().unwrap();
            entries.push_back(QueueEntry {
                job_id: job_id.clone(),
                operation_class: request.operation_class,
                enqueued_at: now,
            });
            entries.len()
        };
        let estimated_wait = position as i64 * self.config.spacing_seconds;
        info!(
            job_id = %job_id,
            class = %request.operation_class,
            position,
            reason = %verdict.reason.map(|r| r.to_string()).unwrap_or_default(),
            "Job queued"
        );
        Ok(SubmitOutcome {
            job_id,
            admitted_immediately: false,
            queue_position: position,
            estimated_wait_seconds: estimated_wait,
            denial_reason: verdict.reason,
        })
    }

    /// Try to release the head entry. Returns the released job's ID, or None
    /// when the queue is empty or the head is still rate limited.
    pub async fn process_next(&self) -> Result<Option<JobId>> {
        loop {
            let head = {
                let entries = self.entries.lock().unwrap();
                entries.front().cloned()
            };
            let Some(entry) = head else {
                return Ok(None);
            };

            let verdict = self.rate_limiter.can_proceed(entry.operation_class);
            if !verdict.allowed {
                return Ok(None);
            }

            // pop before the async fetch so a concurrent drain tick cannot
            // release the same entry twice
            {
                let mut entries = self.entries.lock().unwrap();
                match entries.front() {
                    Some(front) if front.job_id == entry.job_id => {
                        entries.pop_front();
                    }
                    _ => continue,
                }
            }

            match self.job_repo.find_by_id(&entry.job_id).await {
                Ok(Some(job)) if job.status == JobStatus::Queued => {
                    self.rate_limiter.record_request(entry.operation_class);
                    let waited_ms = self.time_provider.now_millis() - entry.enqueued_at;
                    info!(job_id = %entry.job_id, waited_ms, "Job released from queue");
                    self.executor.spawn(job);
                    return Ok(Some(entry.job_id));
                }
                Ok(Some(job)) => {
                    // already swept or cancelled; skip without spending quota
                    debug!(job_id = %entry.job_id, status = %job.status, "Skipping stale queue entry");
                }
                Ok(None) => {
                    warn!(job_id = %entry.job_id, "Queued job vanished from storage");
                }
                Err(err) => {
                    error!(job_id = %entry.job_id, error = %err, "Failed to load queued job");
                    let now = self.time_provider.now_millis();
                    if let Err(mark_err) = self
                        .job_repo
                        .mark_failed(
                            &entry.job_id,
                            FailureKind::HandoffFailed,
                            "could not hand queued job to the executor",
                            now,
                        )
                        .await
                    {
                        error!(job_id = %entry.job_id, error = %mark_err, "Failed to fail stuck entry");
                    }
                }
            }
        }
    }

    /// Drain loop. Releases entries as quota recovers, sleeping on the
    /// limiter's own wait estimate when the head is blocked.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!("Queue drain loop started");
        loop {
            let sleep_ms = self.next_sleep_ms();
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)) => {
                    if let Err(err) = self.process_next().await {
                        error!(error = %err, "Queue drain tick failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Queue drain loop stopping");
                    return;
                }
            }
        }
    }

    fn next_sleep_ms(&self) -> u64 {
        let head_class = {
            let entries = self.entries.lock().unwrap();
            entries.front().map(|e| e.operation_class)
        };
        match head_class {
            None => self.config.idle_sleep_ms,
            Some(class) => {
                let verdict = self.rate_limiter.can_proceed(class);
                if verdict.allowed {
                    // release immediately on the next tick
                    10
                } else {
                    (verdict.wait_seconds.clamp(1, 60) * 1000) as u64
                }
            }
        }
    }

    /// Reload persisted Queued jobs after a restart. The in-memory queue
    /// does not survive the process; storage does.
    pub async fn recover(&self) -> Result<usize> {
        let queued = self.job_repo.find_by_status(JobStatus::Queued).await?;
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        for job in &queued {
            entries.push_back(QueueEntry {
                job_id: job.id.clone(),
                operation_class: job.operation_class,
                enqueued_at: job.created_at,
            });
        }
        Ok(entries.len())
    }

    pub fn depth(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn status(&self) -> QueueStatus {
        let depth = self.depth();
        QueueStatus {
            depth,
            estimated_drain_seconds: depth as i64 * self.config.spacing_seconds,
        }
    }
}
