// SQLite CallAudit Implementation

use async_trait::async_trait;
use genqueue_core::error::Result;
use genqueue_core::port::{CallAudit, ProviderCall};
use sqlx::SqlitePool;

use crate::job_repository::map_sqlx_error;

pub struct SqliteCallAudit {
    pool: SqlitePool,
}

impl SqliteCallAudit {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallAudit for SqliteCallAudit {
    async fn record(&self, call: ProviderCall) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_calls (
                job_id, handle, kind, status_code, ok,
                error_message, duration_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&call.job_id)
        .bind(&call.handle)
        .bind(call.kind.as_str())
        .bind(call.status_code.map(|c| c as i64))
        .bind(if call.ok { 1 } else { 0 })
        .bind(&call.error_message)
        .bind(call.duration_ms)
        .bind(call.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn purge_older_than(&self, cutoff_millis: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM provider_calls WHERE created_at < ?")
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use genqueue_core::port::call_audit::CallKind;

    fn call(created_at: i64) -> ProviderCall {
        ProviderCall {
            job_id: Some("job-1".to_string()),
            handle: Some("operations/abc".to_string()),
            kind: CallKind::Poll,
            status_code: Some(200),
            ok: true,
            error_message: None,
            duration_ms: 120,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_record_and_purge() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let audit = SqliteCallAudit::new(pool.clone());

        audit.record(call(1_000)).await.unwrap();
        audit.record(call(5_000)).await.unwrap();

        let purged = audit.purge_older_than(3_000).await.unwrap();
        assert_eq!(purged, 1);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM provider_calls")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
