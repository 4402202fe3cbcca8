// Application Layer - Use cases and long-running loops

pub mod backoff;
pub mod circuit_breaker;
pub mod executor;
pub mod queue;
pub mod rate_limit;
pub mod reconciler;
pub mod shutdown;

pub use backoff::retry_delay_ms;
pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use executor::{ExecutorConfig, OperationExecutor};
pub use queue::{JobQueue, QueueConfig, SubmitOutcome, SubmitRequest};
pub use rate_limit::{DenialReason, RateLimitConfig, RateLimiter, UsageSnapshot, Verdict};
pub use reconciler::{HealthSnapshot, Reconciler, ReconcilerConfig};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
