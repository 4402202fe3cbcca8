// Operation executor
//
// Owns the full provider lifecycle of one job: start the remote operation,
// poll it to completion, resolve the result. Each job runs in its own task,
// so a slow operation never blocks admission of the next one.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::application::backoff::retry_delay_ms;
use crate::application::circuit_breaker::CircuitBreaker;
use crate::domain::{FailureKind, Job};
use crate::port::{GenerationProvider, JobRepository, ProviderError, StartRequest, TimeProvider};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub poll_interval_ms: u64,
    /// Wall-clock ceiling for one operation, measured from the start call
    pub poll_timeout_ms: i64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Consecutive transient poll failures tolerated before the job fails
    pub max_retry_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            poll_timeout_ms: 600_000,
            retry_base_delay_ms: 60_000,
            retry_max_delay_ms: 600_000,
            max_retry_attempts: 3,
        }
    }
}

pub struct OperationExecutor {
    job_repo: Arc<dyn JobRepository>,
    provider: Arc<dyn GenerationProvider>,
    breaker: Arc<CircuitBreaker>,
    time_provider: Arc<dyn TimeProvider>,
    config: ExecutorConfig,
}

impl OperationExecutor {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        provider: Arc<dyn GenerationProvider>,
        breaker: Arc<CircuitBreaker>,
        time_provider: Arc<dyn TimeProvider>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            job_repo,
            provider,
            breaker,
            time_provider,
            config,
        }
    }

    /// Detach a task that drives the job to a terminal state.
    pub fn spawn(self: &Arc<Self>, job: Job) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.run(job).await;
        });
    }

    /// Drive one job to a terminal state. All terminal writes go through the
    /// guarded repository updates, so a reconciler sweep that got there first
    /// wins and this task backs off.
    pub async fn run(&self, job: Job) {
        let job_id = job.id.clone();
        let started_at = self.time_provider.now_millis();

        let request = StartRequest {
            job_id: job_id.clone(),
            operation_class: job.operation_class,
            payload: job.payload.as_value().clone(),
        };

        let handle = match self
            .breaker
            .execute(|| self.provider.start_operation(&request))
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                // Start failures are terminal. Admission already spent rate
                // quota on this attempt; retrying would spend more without
                // going back through the limiter.
                warn!(job_id = %job_id, error = %err, "Failed to start remote operation");
                self.fail_job(&job_id, err.failure_kind(), &err.to_string())
                    .await;
                return;
            }
        };

        info!(job_id = %job_id, handle = %handle, "Remote operation started");
        if let Err(err) = self
            .job_repo
            .set_processing(&job_id, &handle, self.time_provider.now_millis())
            .await
        {
            // someone else moved the job; the operation keeps running and the
            // drift sweep will reconcile it
            error!(job_id = %job_id, error = %err, "Failed to record provider handle");
            return;
        }

        self.poll_until_terminal(&job_id, &handle, started_at).await;
    }

    async fn poll_until_terminal(&self, job_id: &str, handle: &str, started_at: i64) {
        let mut transient_streak: u32 = 0;

        loop {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.poll_interval_ms))
                .await;

            let now = self.time_provider.now_millis();
            let elapsed = now - started_at;
            if elapsed >= self.config.poll_timeout_ms {
                warn!(job_id = %job_id, elapsed_ms = elapsed, "Operation timed out");
                self.fail_job(
                    job_id,
                    FailureKind::Timeout,
                    "operation did not finish within the polling window",
                )
                .await;
                return;
            }

            match self
                .breaker
                .execute(|| self.provider.operation_status(handle))
                .await
            {
                Ok(status) => {
                    transient_streak = 0;
                    if status.done {
                        self.finish(job_id, handle, &status).await;
                        return;
                    }
                    let progress = estimate_progress(elapsed, self.config.poll_timeout_ms);
                    if let Err(err) = self.job_repo.set_progress(job_id, progress, now).await {
                        debug!(job_id = %job_id, error = %err, "Progress update skipped");
                    }
                }
                // an open circuit during polling is a provider outage from
                // this job's point of view, retried like any transient error
                Err(err) if err.is_transient() || matches!(err, ProviderError::CircuitOpen { .. }) => {
                    transient_streak += 1;
                    if transient_streak > self.config.max_retry_attempts {
                        warn!(job_id = %job_id, error = %err, "Transient errors exhausted retries");
                        self.fail_job(job_id, err.failure_kind(), &err.to_string())
                            .await;
                        return;
                    }
                    let delay = retry_delay_ms(
                        transient_streak - 1,
                        self.config.retry_base_delay_ms,
                        self.config.retry_max_delay_ms,
                    );
                    debug!(
                        job_id = %job_id,
                        attempt = transient_streak,
                        delay_ms = delay,
                        error = %err,
                        "Transient poll failure, backing off"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "Fatal poll failure");
                    self.fail_job(job_id, err.failure_kind(), &err.to_string())
                        .await;
                    return;
                }
            }
        }
    }

    async fn finish(&self, job_id: &str, handle: &str, status: &crate::port::OperationStatus) {
        if let Some(message) = &status.error {
            self.fail_job(job_id, FailureKind::ProviderError, message)
                .await;
            return;
        }

        if status.state != "COMPLETED" {
            self.fail_job(
                job_id,
                FailureKind::ProviderError,
                &format!("operation finished in unexpected state: {}", status.state),
            )
            .await;
            return;
        }

        // A done operation without a resolvable output is a failure, never a
        // bare Completed.
        let uri = match &status.result_uri {
            Some(uri) => uri.clone(),
            None => match self
                .breaker
                .execute(|| self.provider.fetch_result(handle))
                .await
            {
                Ok(uri) => uri,
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "Result fetch failed");
                    self.fail_job(job_id, FailureKind::ResultFetchFailed, &err.to_string())
                        .await;
                    return;
                }
            },
        };

        let now = self.time_provider.now_millis();
        match self.job_repo.mark_completed(job_id, Some(&uri), now).await {
            Ok(()) => info!(job_id = %job_id, result_uri = %uri, "Job completed"),
            Err(err) => debug!(job_id = %job_id, error = %err, "Completion write lost race"),
        }
    }

    async fn fail_job(&self, job_id: &str, kind: FailureKind, message: &str) {
        let now = self.time_provider.now_millis();
        match self.job_repo.mark_failed(job_id, kind, message, now).await {
            Ok(()) => info!(job_id = %job_id, kind = %kind, "Job failed"),
            Err(err) => debug!(job_id = %job_id, error = %err, "Failure write lost race"),
        }
    }
}

/// Synthetic progress while the provider reports none: ramp from 10 to 90
/// over the polling window, the last 10 points reserved for result
/// resolution.
fn estimate_progress(elapsed_ms: i64, timeout_ms: i64) -> i32 {
    if timeout_ms <= 0 {
        return 10;
    }
    let ramp = (elapsed_ms.max(0) * 80 / timeout_ms) as i32;
    (10 + ramp).min(90)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_ramps_between_bounds() {
        assert_eq!(estimate_progress(0, 600_000), 10);
        assert_eq!(estimate_progress(300_000, 600_000), 50);
        assert_eq!(estimate_progress(600_000, 600_000), 90);
        assert_eq!(estimate_progress(6_000_000, 600_000), 90);
    }
}
