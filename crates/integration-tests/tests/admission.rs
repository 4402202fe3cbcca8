//! Admission integration tests
//!
//! Submissions beyond the per-minute budget must queue in FIFO order and
//! drain as the window slides, never dropping work.

use std::sync::Arc;

use genqueue_core::application::{
    BreakerConfig, CircuitBreaker, ExecutorConfig, JobQueue, OperationExecutor, QueueConfig,
    RateLimitConfig, RateLimiter, SubmitRequest,
};
use genqueue_core::domain::{JobStatus, OperationClass};
use genqueue_core::port::id_provider::mocks::SequentialIdProvider;
use genqueue_core::port::provider::mocks::MockProvider;
use genqueue_core::port::time_provider::mocks::ManualTimeProvider;
use genqueue_core::port::{JobRepository, TimeProvider};
use genqueue_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};

struct Harness {
    queue: JobQueue,
    repo: Arc<SqliteJobRepository>,
    time: Arc<ManualTimeProvider>,
}

async fn harness(max_rpm: u32, max_rpd: u32) -> Harness {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let time = Arc::new(ManualTimeProvider::new(1_700_000_000_000));
    let repo = Arc::new(SqliteJobRepository::new(pool));
    let provider = Arc::new(MockProvider::new().with_statuses(vec![Ok(
        MockProvider::completed_status("http://localhost/out.mp4"),
    )]));
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default(), time.clone()));
    let executor = Arc::new(OperationExecutor::new(
        repo.clone(),
        provider,
        breaker,
        time.clone(),
        ExecutorConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
    ));
    let rate_limiter = Arc::new(RateLimiter::new(
        RateLimitConfig {
            max_requests_per_minute: max_rpm,
            max_requests_per_day: max_rpd,
        },
        time.clone(),
    ));
    let queue = JobQueue::new(
        repo.clone(),
        rate_limiter,
        executor,
        Arc::new(SequentialIdProvider::new("job")),
        time.clone(),
        QueueConfig::default(),
    );
    Harness { queue, repo, time }
}

fn request() -> SubmitRequest {
    SubmitRequest {
        operation_class: OperationClass::ImageToVideo,
        payload: serde_json::json!({"prompt": "a harbor at dusk", "image": "QUJD"}),
    }
}

#[tokio::test]
async fn eleventh_rapid_submission_is_queued_not_dropped() {
    let h = harness(10, 500).await;

    for i in 0..10 {
        let outcome = h.queue.submit(request()).await.unwrap();
        assert!(outcome.admitted_immediately, "submission {} should pass", i);
        assert_eq!(outcome.queue_position, 0);
    }

    let outcome = h.queue.submit(request()).await.unwrap();
    assert!(!outcome.admitted_immediately);
    assert_eq!(outcome.queue_position, 1);
    assert_eq!(outcome.estimated_wait_seconds, 6);
    assert!(outcome.denial_reason.is_some());

    // still persisted
    let job = h.repo.find_by_id(&outcome.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(h.queue.depth(), 1);
}

#[tokio::test]
async fn queued_submissions_release_in_fifo_order() {
    let h = harness(1, 500).await;

    let first = h.queue.submit(request()).await.unwrap();
    assert!(first.admitted_immediately);

    let second = h.queue.submit(request()).await.unwrap();
    let third = h.queue.submit(request()).await.unwrap();
    assert_eq!(second.queue_position, 1);
    assert_eq!(third.queue_position, 2);

    // head is blocked until the minute window slides
    assert_eq!(h.queue.process_next().await.unwrap(), None);

    h.time.advance(60_000);
    assert_eq!(
        h.queue.process_next().await.unwrap(),
        Some(second.job_id.clone())
    );
    // released one consumed the fresh quota
    assert_eq!(h.queue.process_next().await.unwrap(), None);

    h.time.advance(60_000);
    assert_eq!(h.queue.process_next().await.unwrap(), Some(third.job_id));
    assert_eq!(h.queue.depth(), 0);
}

#[tokio::test]
async fn daily_exhaustion_queues_with_daily_reason() {
    let h = harness(10, 2).await;

    h.queue.submit(request()).await.unwrap();
    h.queue.submit(request()).await.unwrap();

    let outcome = h.queue.submit(request()).await.unwrap();
    assert!(!outcome.admitted_immediately);
    assert_eq!(
        outcome.denial_reason.unwrap().to_string(),
        "daily_limit_exceeded"
    );
    // recovers only as the trailing day window ages out
    assert!(outcome.estimated_wait_seconds > 0);
}

#[tokio::test]
async fn stale_queue_entry_is_skipped_without_spending_quota() {
    let h = harness(1, 500).await;

    h.queue.submit(request()).await.unwrap();
    let parked = h.queue.submit(request()).await.unwrap();
    let parked2 = h.queue.submit(request()).await.unwrap();

    // a sweep failed the parked job while it waited
    h.repo
        .mark_failed(
            &parked.job_id,
            genqueue_core::domain::FailureKind::QueueStuck,
            "queued past the maximum wait",
            h.time.now_millis(),
        )
        .await
        .unwrap();

    h.time.advance(60_000);
    // the stale head is skipped and the next entry released with the quota
    assert_eq!(h.queue.process_next().await.unwrap(), Some(parked2.job_id));
}

#[tokio::test]
async fn recovery_reloads_persisted_queued_jobs() {
    let h = harness(10, 500).await;

    // a job left behind by a previous process
    let orphan = genqueue_core::domain::Job::new(
        "orphan-1",
        h.time.now_millis() - 30_000,
        OperationClass::ImageToVideo,
        genqueue_core::domain::JobPayload::new(
            serde_json::json!({"prompt": "a lighthouse", "image": "QUJD"}),
        ),
    );
    h.repo.insert(&orphan).await.unwrap();
    assert_eq!(h.queue.depth(), 0);

    let recovered = h.queue.recover().await.unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(
        h.queue.process_next().await.unwrap(),
        Some("orphan-1".to_string())
    );
}
