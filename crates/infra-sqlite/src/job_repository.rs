// SQLite JobRepository Implementation

use async_trait::async_trait;
use genqueue_core::domain::{FailureKind, Job, JobPayload, JobStatus};
use genqueue_core::error::{AppError, Result};
use genqueue_core::port::JobRepository;
use sqlx::SqlitePool;

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // Extract database-specific error code and message
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => {
                        // UNIQUE constraint failed
                        AppError::Conflict(format!(
                            "Unique constraint violation: {} ({})",
                            db_err.message(),
                            code_str
                        ))
                    }
                    "5" => {
                        // SQLITE_BUSY - database is locked
                        AppError::Database(format!(
                            "Database locked (SQLITE_BUSY): {}",
                            db_err.message()
                        ))
                    }
                    "13" => {
                        // SQLITE_FULL - database or disk is full
                        AppError::Database(format!("Database full: {}", db_err.message()))
                    }
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Distinguish a missing row from a terminal-state guard rejection after
    /// a conditional update touched zero rows.
    async fn explain_zero_rows(&self, id: &str, target: &str) -> AppError {
        let current: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(None) => AppError::NotFound(format!("Job {} not found", id)),
            Ok(Some(status)) => AppError::InvalidState(format!(
                "Cannot move job {} from {} to {}",
                id, status, target
            )),
            Err(err) => map_sqlx_error(err),
        }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, operation_class, status, provider_handle, progress_percent,
                payload, result_uri, error_kind, error_message,
                created_at, updated_at, completed_at, failed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.operation_class.as_str())
        .bind(job.status.to_string())
        .bind(&job.provider_handle)
        .bind(job.progress_percent)
        .bind(job.payload.as_value().to_string())
        .bind(&job.result_uri)
        .bind(job.error_kind.map(|k| k.as_str()))
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .bind(job.failed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.into_job()))
    }

    async fn set_processing(
        &self,
        id: &str,
        provider_handle: &str,
        now_millis: i64,
    ) -> Result<()> {
        // Conditional update: only a Queued job can start processing
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING', provider_handle = ?, updated_at = ?
            WHERE id = ? AND status = 'QUEUED'
            "#,
        )
        .bind(provider_handle)
        .bind(now_millis)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.explain_zero_rows(id, "PROCESSING").await);
        }
        Ok(())
    }

    async fn set_progress(&self, id: &str, percent: i32, now_millis: i64) -> Result<()> {
        // Best effort: silently skipped on terminal jobs
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress_percent = ?, updated_at = ?
            WHERE id = ? AND status NOT IN ('COMPLETED', 'FAILED')
            "#,
        )
        .bind(percent)
        .bind(now_millis)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn mark_completed(
        &self,
        id: &str,
        result_uri: Option<&str>,
        now_millis: i64,
    ) -> Result<()> {
        // Conditional update to prevent overwriting a terminal state
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'COMPLETED', result_uri = ?, progress_percent = 100,
                completed_at = ?, updated_at = ?
            WHERE id = ? AND status NOT IN ('COMPLETED', 'FAILED')
            "#,
        )
        .bind(result_uri)
        .bind(now_millis)
        .bind(now_millis)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.explain_zero_rows(id, "COMPLETED").await);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        kind: FailureKind,
        message: &str,
        now_millis: i64,
    ) -> Result<()> {
        // Conditional update to prevent overwriting a terminal state
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'FAILED', error_kind = ?, error_message = ?,
                failed_at = ?, updated_at = ?
            WHERE id = ? AND status NOT IN ('COMPLETED', 'FAILED')
            "#,
        )
        .bind(kind.as_str())
        .bind(message)
        .bind(now_millis)
        .bind(now_millis)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.explain_zero_rows(id, "FAILED").await);
        }
        Ok(())
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|row| row.into_job()).collect())
    }

    async fn find_processing_with_handle(&self) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = 'PROCESSING' AND provider_handle IS NOT NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|row| row.into_job()).collect())
    }

    async fn find_stuck_without_handle(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = 'PROCESSING' AND provider_handle IS NULL AND created_at < ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|row| row.into_job()).collect())
    }

    async fn find_queued_older_than(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = 'QUEUED' AND created_at < ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|row| row.into_job()).collect())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count as u64)
    }

    async fn count_created_since(&self, cutoff_millis: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE created_at >= ?")
            .bind(cutoff_millis)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count as u64)
    }

    async fn purge_terminal_older_than(
        &self,
        status: JobStatus,
        cutoff_millis: i64,
    ) -> Result<u64> {
        if !status.is_terminal() {
            return Err(AppError::Validation(format!(
                "refusing to purge non-terminal status {}",
                status
            )));
        }

        let result = sqlx::query("DELETE FROM jobs WHERE status = ? AND updated_at < ?")
            .bind(status.to_string())
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    operation_class: String,
    status: String,
    provider_handle: Option<String>,
    progress_percent: i32,
    payload: String,
    result_uri: Option<String>,
    error_kind: Option<String>,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
    failed_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Job {
        use genqueue_core::domain::OperationClass;

        let status = match self.status.as_str() {
            "QUEUED" => JobStatus::Queued,
            "PROCESSING" => JobStatus::Processing,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Failed, // Default fallback
        };

        let operation_class = self
            .operation_class
            .parse::<OperationClass>()
            .unwrap_or(OperationClass::ImageToVideo);

        let payload: serde_json::Value =
            serde_json::from_str(&self.payload).unwrap_or(serde_json::json!({}));

        Job {
            id: self.id,
            operation_class,
            status,
            provider_handle: self.provider_handle,
            progress_percent: self.progress_percent,
            payload: JobPayload::new(payload),
            result_uri: self.result_uri,
            error_kind: self.error_kind.as_deref().and_then(FailureKind::parse),
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use genqueue_core::domain::OperationClass;

    async fn setup_repo() -> SqliteJobRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobRepository::new(pool)
    }

    fn test_job(id: &str, created_at: i64) -> Job {
        Job::new(
            id,
            created_at,
            OperationClass::ImageToVideo,
            JobPayload::new(serde_json::json!({"prompt": "a dog on a skateboard"})),
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = setup_repo().await;
        let job = test_job("job-1", 1_000);

        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id("job-1").await.unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.status, JobStatus::Queued);
        assert_eq!(found.operation_class, OperationClass::ImageToVideo);
        assert_eq!(found.payload.as_value()["prompt"], "a dog on a skateboard");
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let repo = setup_repo().await;
        let job = test_job("job-1", 1_000);
        repo.insert(&job).await.unwrap();

        let err = repo.insert(&job).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_set_processing_requires_queued() {
        let repo = setup_repo().await;
        repo.insert(&test_job("job-1", 1_000)).await.unwrap();

        repo.set_processing("job-1", "operations/abc", 2_000)
            .await
            .unwrap();
        let job = repo.find_by_id("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.provider_handle.as_deref(), Some("operations/abc"));

        // second attempt must be rejected
        let err = repo
            .set_processing("job-1", "operations/xyz", 3_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_terminal_state_is_not_overwritten() {
        let repo = setup_repo().await;
        repo.insert(&test_job("job-1", 1_000)).await.unwrap();
        repo.set_processing("job-1", "operations/abc", 2_000)
            .await
            .unwrap();
        repo.mark_completed("job-1", Some("http://localhost/v.mp4"), 3_000)
            .await
            .unwrap();

        let err = repo
            .mark_failed("job-1", FailureKind::Timeout, "late sweep", 4_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let job = repo.find_by_id("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_uri.as_deref(), Some("http://localhost/v.mp4"));
        assert_eq!(job.progress_percent, 100);
    }

    #[tokio::test]
    async fn test_mark_failed_records_kind() {
        let repo = setup_repo().await;
        repo.insert(&test_job("job-1", 1_000)).await.unwrap();

        repo.mark_failed(
            "job-1",
            FailureKind::ProviderNotFound,
            "operation not found upstream",
            2_000,
        )
        .await
        .unwrap();

        let job = repo.find_by_id("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_kind, Some(FailureKind::ProviderNotFound));
        assert_eq!(job.failed_at, Some(2_000));
    }

    #[tokio::test]
    async fn test_mark_on_missing_job_is_not_found() {
        let repo = setup_repo().await;
        let err = repo
            .mark_completed("ghost", None, 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_stuck_without_handle() {
        let repo = setup_repo().await;

        // processing without handle, old enough
        let mut stuck = test_job("stuck", 1_000);
        stuck.status = JobStatus::Processing;
        repo.insert(&stuck).await.unwrap();

        // processing with handle
        repo.insert(&test_job("healthy", 1_000)).await.unwrap();
        repo.set_processing("healthy", "operations/abc", 2_000)
            .await
            .unwrap();

        // too recent
        let mut recent = test_job("recent", 50_000);
        recent.status = JobStatus::Processing;
        repo.insert(&recent).await.unwrap();

        let found = repo.find_stuck_without_handle(10_000).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "stuck");
    }

    #[tokio::test]
    async fn test_purge_terminal_older_than() {
        let repo = setup_repo().await;
        repo.insert(&test_job("old-failed", 1_000)).await.unwrap();
        repo.mark_failed("old-failed", FailureKind::Timeout, "t/o", 2_000)
            .await
            .unwrap();
        repo.insert(&test_job("fresh-failed", 1_000)).await.unwrap();
        repo.mark_failed("fresh-failed", FailureKind::Timeout, "t/o", 90_000)
            .await
            .unwrap();

        let purged = repo
            .purge_terminal_older_than(JobStatus::Failed, 50_000)
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.find_by_id("old-failed").await.unwrap().is_none());
        assert!(repo.find_by_id("fresh-failed").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_counts() {
        let repo = setup_repo().await;
        repo.insert(&test_job("a", 1_000)).await.unwrap();
        repo.insert(&test_job("b", 2_000)).await.unwrap();
        repo.mark_failed("b", FailureKind::QueueStuck, "stuck", 3_000)
            .await
            .unwrap();

        assert_eq!(repo.count_by_status(JobStatus::Queued).await.unwrap(), 1);
        assert_eq!(repo.count_by_status(JobStatus::Failed).await.unwrap(), 1);
        assert_eq!(repo.count_created_since(1_500).await.unwrap(), 1);
    }
}
