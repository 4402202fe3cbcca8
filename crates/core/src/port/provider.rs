// Generation Provider Port
//
// Abstraction over a remote long-running generation API. The adapter owns
// wire formats and HTTP concerns; this port only speaks in handles and
// operation status snapshots.

use async_trait::async_trait;

use crate::domain::{FailureKind, OperationClass};

/// Classified provider failure
///
/// Classification drives retry and circuit decisions, so adapters must map
/// transport status codes into these variants rather than surfacing raw
/// errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Provider unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Circuit open, retry after {retry_after_secs}s")]
    CircuitOpen { retry_after_secs: i64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ProviderError {
    /// Transient errors are retried with backoff; the rest fail the job
    /// immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::QuotaExceeded(_)
                | ProviderError::Unavailable { .. }
                | ProviderError::Transport(_)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::QuotaExceeded(_) => FailureKind::ProviderQuotaExceeded,
            ProviderError::Unavailable { .. } => FailureKind::ProviderUnavailable,
            ProviderError::AuthFailed(_) => FailureKind::ProviderAuthError,
            ProviderError::NotFound(_) => FailureKind::ProviderNotFound,
            ProviderError::CircuitOpen { .. } => FailureKind::CircuitOpen,
            ProviderError::Transport(_) => FailureKind::ProviderUnavailable,
            ProviderError::Api { .. } => FailureKind::ProviderError,
        }
    }
}

/// Request to start a remote operation
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub job_id: String,
    pub operation_class: OperationClass,
    /// Opaque generation payload (prompt, source image, parameters).
    /// Interpreted by the adapter, not by the core.
    pub payload: serde_json::Value,
}

/// Snapshot of a remote operation as reported by the provider
#[derive(Debug, Clone)]
pub struct OperationStatus {
    pub done: bool,
    /// Provider-reported state string, e.g. "RUNNING" or "COMPLETED"
    pub state: String,
    /// Present when the operation finished successfully and the provider
    /// already included the output location in the status response.
    pub result_uri: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Start a long-running operation. Returns the provider's opaque
    /// operation handle on success.
    async fn start_operation(&self, request: &StartRequest) -> Result<String, ProviderError>;

    /// Fetch the current status of a previously started operation.
    async fn operation_status(&self, handle: &str) -> Result<OperationStatus, ProviderError>;

    /// Resolve the output URI of a finished operation.
    async fn fetch_result(&self, handle: &str) -> Result<String, ProviderError>;
}

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider for tests
    ///
    /// Status responses are consumed in order; the last one repeats once the
    /// script is exhausted. Call counters let tests assert fail-fast paths
    /// that must not reach the provider.
    pub struct MockProvider {
        start_outcome: Mutex<Result<String, ProviderError>>,
        statuses: Mutex<VecDeque<Result<OperationStatus, ProviderError>>>,
        last_status: Mutex<Option<Result<OperationStatus, ProviderError>>>,
        result_outcome: Mutex<Result<String, ProviderError>>,
        pub start_calls: AtomicUsize,
        pub status_calls: AtomicUsize,
        pub result_calls: AtomicUsize,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self {
                start_outcome: Mutex::new(Ok("operations/mock-op".to_string())),
                statuses: Mutex::new(VecDeque::new()),
                last_status: Mutex::new(None),
                result_outcome: Mutex::new(Ok("http://localhost/result.mp4".to_string())),
                start_calls: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
                result_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_start_outcome(self, outcome: Result<String, ProviderError>) -> Self {
            *self.start_outcome.lock().unwrap() = outcome;
            self
        }

        pub fn with_statuses(
            self,
            statuses: Vec<Result<OperationStatus, ProviderError>>,
        ) -> Self {
            *self.statuses.lock().unwrap() = statuses.into();
            self
        }

        pub fn with_result_outcome(self, outcome: Result<String, ProviderError>) -> Self {
            *self.result_outcome.lock().unwrap() = outcome;
            self
        }

        pub fn running_status() -> OperationStatus {
            OperationStatus {
                done: false,
                state: "RUNNING".to_string(),
                result_uri: None,
                error: None,
            }
        }

        pub fn completed_status(result_uri: &str) -> OperationStatus {
            OperationStatus {
                done: true,
                state: "COMPLETED".to_string(),
                result_uri: Some(result_uri.to_string()),
                error: None,
            }
        }

        pub fn failed_status(message: &str) -> OperationStatus {
            OperationStatus {
                done: true,
                state: "FAILED".to_string(),
                result_uri: None,
                error: Some(message.to_string()),
            }
        }
    }

    impl Default for MockProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl GenerationProvider for MockProvider {
        async fn start_operation(
            &self,
            _request: &StartRequest,
        ) -> Result<String, ProviderError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.start_outcome.lock().unwrap().clone()
        }

        async fn operation_status(
            &self,
            _handle: &str,
        ) -> Result<OperationStatus, ProviderError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let mut queue = self.statuses.lock().unwrap();
            if let Some(next) = queue.pop_front() {
                *self.last_status.lock().unwrap() = Some(next.clone());
                return next;
            }
            drop(queue);
            match self.last_status.lock().unwrap().clone() {
                Some(last) => last,
                None => Ok(MockProvider::running_status()),
            }
        }

        async fn fetch_result(&self, _handle: &str) -> Result<String, ProviderError> {
            self.result_calls.fetch_add(1, Ordering::SeqCst);
            self.result_outcome.lock().unwrap().clone()
        }
    }
}
