// Reconciler
//
// Periodic sweeps that repair drift between local job records and reality:
// jobs that never reached the provider, local state lagging behind the
// remote operation, entries stuck in the queue, and old terminal rows.
// Every sweep is idempotent and contains failures per item, so one bad job
// never aborts the pass.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::application::shutdown::ShutdownToken;
use crate::domain::{FailureKind, JobStatus};
use crate::error::Result;
use crate::port::{CallAudit, GenerationProvider, JobRepository, ProviderError, TimeProvider};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Age after which a Processing job without a handle is declared lost
    pub stuck_without_handle_after_ms: i64,
    pub stuck_sweep_interval_ms: u64,

    pub drift_sweep_interval_ms: u64,
    /// Hard age ceiling for any Processing job with a handle
    pub processing_age_ceiling_ms: i64,

    /// Queued this long draws a warning
    pub queued_warn_after_ms: i64,
    /// Queued this long is failed outright
    pub queued_fail_after_ms: i64,
    pub queued_sweep_interval_ms: u64,

    pub retention_sweep_interval_ms: u64,
    pub failed_retention_ms: i64,
    pub completed_retention_ms: i64,
    pub audit_retention_ms: i64,

    pub health_interval_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            stuck_without_handle_after_ms: 20 * 60 * 1000,
            stuck_sweep_interval_ms: 5 * 60 * 1000,
            drift_sweep_interval_ms: 5 * 60 * 1000,
            processing_age_ceiling_ms: 60 * 60 * 1000,
            queued_warn_after_ms: 10 * 60 * 1000,
            queued_fail_after_ms: 60 * 60 * 1000,
            queued_sweep_interval_ms: 10 * 60 * 1000,
            retention_sweep_interval_ms: 60 * 60 * 1000,
            failed_retention_ms: 24 * 60 * 60 * 1000,
            completed_retention_ms: 7 * 24 * 60 * 60 * 1000,
            audit_retention_ms: 7 * 24 * 60 * 60 * 1000,
            health_interval_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DriftOutcome {
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub created_last_24h: u64,
    pub timestamp: i64,
}

pub struct Reconciler {
    job_repo: Arc<dyn JobRepository>,
    provider: Arc<dyn GenerationProvider>,
    call_audit: Arc<dyn CallAudit>,
    time_provider: Arc<dyn TimeProvider>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        provider: Arc<dyn GenerationProvider>,
        call_audit: Arc<dyn CallAudit>,
        time_provider: Arc<dyn TimeProvider>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            job_repo,
            provider,
            call_audit,
            time_provider,
            config,
        }
    }

    /// Fail Processing jobs that never obtained a provider handle. The start
    /// call either never happened or its task died before recording the
    /// handle; there is no remote operation to wait for.
    pub async fn sweep_stuck_without_handle(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.config.stuck_without_handle_after_ms;
        let stuck = self.job_repo.find_stuck_without_handle(cutoff).await?;
        let mut swept = 0;
        for job in stuck {
            warn!(job_id = %job.id, age_ms = job.age_ms(now), "Job never reached the provider");
            match self
                .job_repo
                .mark_failed(
                    &job.id,
                    FailureKind::Timeout,
                    "processing without a provider handle past the deadline",
                    now,
                )
                .await
            {
                Ok(()) => swept += 1,
                Err(err) => warn!(job_id = %job.id, error = %err, "Stuck job write lost race"),
            }
        }
        Ok(swept)
    }

    /// Query the provider for every Processing job with a handle and adopt
    /// the upstream truth. Runs directly against the provider, bypassing the
    /// circuit breaker: reconciliation traffic is low-volume and must keep
    /// working while live traffic is shut off.
    pub async fn sweep_drift(&self) -> Result<DriftOutcome> {
        let jobs = self.job_repo.find_processing_with_handle().await?;
        let mut outcome = DriftOutcome::default();

        for job in jobs {
            let Some(handle) = job.provider_handle.as_deref() else {
                continue;
            };
            let now = self.time_provider.now_millis();

            match self.provider.operation_status(handle).await {
                Ok(status) if status.done => {
                    if let Some(message) = &status.error {
                        if self.fail(&job.id, FailureKind::ProviderError, message).await {
                            outcome.failed += 1;
                        }
                    } else if status.state == "COMPLETED" {
                        match self
                            .job_repo
                            .mark_completed(&job.id, status.result_uri.as_deref(), now)
                            .await
                        {
                            Ok(()) => {
                                info!(job_id = %job.id, "Adopted completed state from provider");
                                outcome.completed += 1;
                            }
                            Err(err) => {
                                warn!(job_id = %job.id, error = %err, "Drift completion lost race")
                            }
                        }
                    } else if self
                        .fail(
                            &job.id,
                            FailureKind::ProviderError,
                            &format!("operation finished in unexpected state: {}", status.state),
                        )
                        .await
                    {
                        outcome.failed += 1;
                    }
                }
                Ok(_) => {
                    // still running upstream; enforce the age ceiling
                    if job.age_ms(now) > self.config.processing_age_ceiling_ms
                        && self
                            .fail(
                                &job.id,
                                FailureKind::Timeout,
                                "processing past the age ceiling",
                            )
                            .await
                    {
                        outcome.failed += 1;
                    }
                }
                Err(ProviderError::NotFound(_)) => {
                    if self
                        .fail(
                            &job.id,
                            FailureKind::ProviderNotFound,
                            "operation not found upstream",
                        )
                        .await
                    {
                        outcome.failed += 1;
                    }
                }
                Err(err) => {
                    // transient upstream trouble; the next pass retries
                    warn!(job_id = %job.id, error = %err, "Drift check failed, skipping");
                }
            }
        }

        if outcome.completed > 0 || outcome.failed > 0 {
            info!(
                completed = outcome.completed,
                failed = outcome.failed,
                "Drift sweep applied changes"
            );
        }
        Ok(outcome)
    }

    /// Warn about long-queued jobs and fail the ones past the hard deadline.
    pub async fn sweep_stuck_queued(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let warn_cutoff = now - self.config.queued_warn_after_ms;
        let fail_cutoff = now - self.config.queued_fail_after_ms;

        let queued = self.job_repo.find_queued_older_than(warn_cutoff).await?;
        let mut failed = 0;
        for job in queued {
            if job.created_at < fail_cutoff {
                if self
                    .fail(
                        &job.id,
                        FailureKind::QueueStuck,
                        "queued past the maximum wait",
                    )
                    .await
                {
                    failed += 1;
                }
            } else {
                warn!(job_id = %job.id, age_ms = job.age_ms(now), "Job queued unusually long");
            }
        }
        Ok(failed)
    }

    /// Purge old terminal jobs and old audit records.
    pub async fn sweep_retention(&self) -> Result<()> {
        let now = self.time_provider.now_millis();

        let failed = self
            .job_repo
            .purge_terminal_older_than(JobStatus::Failed, now - self.config.failed_retention_ms)
            .await?;
        let completed = self
            .job_repo
            .purge_terminal_older_than(
                JobStatus::Completed,
                now - self.config.completed_retention_ms,
            )
            .await?;
        let audit = self
            .call_audit
            .purge_older_than(now - self.config.audit_retention_ms)
            .await?;

        if failed > 0 || completed > 0 || audit > 0 {
            info!(failed, completed, audit, "Retention sweep purged rows");
        }
        Ok(())
    }

    /// Count jobs by status and log the snapshot.
    pub async fn health_check(&self) -> Result<HealthSnapshot> {
        let now = self.time_provider.now_millis();
        let snapshot = HealthSnapshot {
            queued: self.job_repo.count_by_status(JobStatus::Queued).await?,
            processing: self.job_repo.count_by_status(JobStatus::Processing).await?,
            completed: self.job_repo.count_by_status(JobStatus::Completed).await?,
            failed: self.job_repo.count_by_status(JobStatus::Failed).await?,
            created_last_24h: self
                .job_repo
                .count_created_since(now - 24 * 60 * 60 * 1000)
                .await?,
            timestamp: now,
        };
        info!(
            queued = snapshot.queued,
            processing = snapshot.processing,
            completed = snapshot.completed,
            failed = snapshot.failed,
            created_last_24h = snapshot.created_last_24h,
            "Health check"
        );
        Ok(snapshot)
    }

    /// Periodic loop multiplexing all sweeps. Sweep errors are logged and the
    /// loop keeps going.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        use std::time::Duration;
        use tokio::time::{interval, MissedTickBehavior};

        let mut stuck = interval(Duration::from_millis(self.config.stuck_sweep_interval_ms));
        let mut drift = interval(Duration::from_millis(self.config.drift_sweep_interval_ms));
        let mut queued = interval(Duration::from_millis(self.config.queued_sweep_interval_ms));
        let mut retention =
            interval(Duration::from_millis(self.config.retention_sweep_interval_ms));
        let mut health = interval(Duration::from_millis(self.config.health_interval_ms));
        for iv in [&mut stuck, &mut drift, &mut queued, &mut retention, &mut health] {
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // skip the immediate first tick
            iv.reset();
        }

        info!("Reconciler started");
        loop {
            tokio::select! {
                _ = stuck.tick() => {
                    if let Err(err) = self.sweep_stuck_without_handle().await {
                        error!(error = %err, "Stuck-job sweep failed");
                    }
                }
                _ = drift.tick() => {
                    if let Err(err) = self.sweep_drift().await {
                        error!(error = %err, "Drift sweep failed");
                    }
                }
                _ = queued.tick() => {
                    if let Err(err) = self.sweep_stuck_queued().await {
                        error!(error = %err, "Queued-job sweep failed");
                    }
                }
                _ = retention.tick() => {
                    if let Err(err) = self.sweep_retention().await {
                        error!(error = %err, "Retention sweep failed");
                    }
                }
                _ = health.tick() => {
                    if let Err(err) = self.health_check().await {
                        error!(error = %err, "Health check failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Reconciler stopping");
                    return;
                }
            }
        }
    }

    async fn fail(&self, job_id: &str, kind: FailureKind, message: &str) -> bool {
        let now = self.time_provider.now_millis();
        match self.job_repo.mark_failed(job_id, kind, message, now).await {
            Ok(()) => {
                info!(job_id = %job_id, kind = %kind, message, "Reconciler failed job");
                true
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Reconciler write lost race");
                false
            }
        }
    }
}
