//! Genqueue - Main Entry Point
//!
//! Wires the admission queue, executor, and reconciler against the SQLite
//! store and the HTTP generation provider, then runs until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use genqueue_core::application::{
    shutdown_channel, BreakerConfig, CircuitBreaker, ExecutorConfig, JobQueue,
    OperationExecutor, QueueConfig, RateLimitConfig, RateLimiter, Reconciler, ReconcilerConfig,
};
use genqueue_core::port::id_provider::UuidProvider;
use genqueue_core::port::time_provider::SystemTimeProvider;
use genqueue_core::port::CallAudit;
use genqueue_infra_sqlite::{create_pool, run_migrations, SqliteCallAudit, SqliteJobRepository};
use genqueue_provider_http::{HttpGenerationProvider, ProviderConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.genqueue/jobs.db";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format = std::env::var("GENQUEUE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("genqueue=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Genqueue v{} starting...", VERSION);

    // 2. Load configuration
    let db_path = std::env::var("GENQUEUE_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

    let api_key = std::env::var("GENQUEUE_API_KEY")
        .map_err(|_| anyhow::anyhow!("GENQUEUE_API_KEY is required"))?;

    let mut provider_config = ProviderConfig {
        api_key,
        ..Default::default()
    };
    if let Ok(base_url) = std::env::var("GENQUEUE_PROVIDER_URL") {
        provider_config.base_url = base_url;
    }
    if let Ok(model) = std::env::var("GENQUEUE_VIDEO_MODEL") {
        provider_config.video_model = model;
    }

    info!(db_path = %db_path, "Initializing database...");

    // 3. Initialize database
    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let job_repo = Arc::new(SqliteJobRepository::new(pool.clone()));
    let call_audit: Arc<dyn CallAudit> = Arc::new(SqliteCallAudit::new(pool.clone()));

    let provider = Arc::new(
        HttpGenerationProvider::new(
            provider_config,
            Some(call_audit.clone()),
            time_provider.clone(),
        )
        .map_err(|e| anyhow::anyhow!("Provider setup failed: {}", e))?,
    );

    let rate_limiter = Arc::new(RateLimiter::new(
        RateLimitConfig::default(),
        time_provider.clone(),
    ));
    let breaker = Arc::new(CircuitBreaker::new(
        BreakerConfig::default(),
        time_provider.clone(),
    ));

    let executor = Arc::new(OperationExecutor::new(
        job_repo.clone(),
        provider.clone(),
        breaker.clone(),
        time_provider.clone(),
        ExecutorConfig::default(),
    ));

    let queue = Arc::new(JobQueue::new(
        job_repo.clone(),
        rate_limiter.clone(),
        executor.clone(),
        id_provider,
        time_provider.clone(),
        QueueConfig::default(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        job_repo,
        provider,
        call_audit,
        time_provider,
        ReconcilerConfig::default(),
    ));

    // 5. Run queue recovery (re-queue jobs that were still waiting)
    info!("Running queue recovery...");
    match queue.recover().await {
        Ok(count) => info!(recovered_jobs = count, "Queue recovery completed"),
        Err(e) => tracing::error!(error = ?e, "Queue recovery failed"),
    }

    // 6. Start long-running loops
    info!("Starting queue drain loop and reconciler...");
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let queue_handle = {
        let queue = queue.clone();
        let token = shutdown_rx.clone();
        tokio::spawn(async move {
            queue.run(token).await;
        })
    };

    let reconciler_handle = {
        let token = shutdown_rx;
        tokio::spawn(async move {
            reconciler.run(token).await;
        })
    };

    info!("System ready. Waiting for submissions...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown
    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), queue_handle).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), reconciler_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
