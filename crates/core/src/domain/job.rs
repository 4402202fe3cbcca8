// Job Domain Model

use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Job status
///
/// Monotonic lifecycle: Queued -> Processing -> Completed | Failed.
/// Terminal states are never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Processing => write!(f, "PROCESSING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::domain::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(crate::domain::error::DomainError::ValidationError(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Operation class
///
/// Explicit tag set at creation time. Selects both the rate-limit bucket and
/// the provider endpoint for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationClass {
    TextToVideo,
    ImageToVideo,
    ImageEdit,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::TextToVideo => "TEXT_TO_VIDEO",
            OperationClass::ImageToVideo => "IMAGE_TO_VIDEO",
            OperationClass::ImageEdit => "IMAGE_EDIT",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OperationClass {
    type Err = crate::domain::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT_TO_VIDEO" => Ok(OperationClass::TextToVideo),
            "IMAGE_TO_VIDEO" => Ok(OperationClass::ImageToVideo),
            "IMAGE_EDIT" => Ok(OperationClass::ImageEdit),
            other => Err(
                crate::domain::error::DomainError::UnknownOperationClass(other.to_string()),
            ),
        }
    }
}

/// Classified kind of a terminal failure, recorded alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProviderQuotaExceeded,
    ProviderUnavailable,
    ProviderAuthError,
    ProviderNotFound,
    ProviderError,
    CircuitOpen,
    Timeout,
    ResultFetchFailed,
    QueueStuck,
    HandoffFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ProviderQuotaExceeded => "provider_quota_exceeded",
            FailureKind::ProviderUnavailable => "provider_unavailable",
            FailureKind::ProviderAuthError => "provider_auth_error",
            FailureKind::ProviderNotFound => "provider_not_found",
            FailureKind::ProviderError => "provider_error",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::Timeout => "timeout",
            FailureKind::ResultFetchFailed => "result_fetch_failed",
            FailureKind::QueueStuck => "queue_stuck",
            FailureKind::HandoffFailed => "handoff_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider_quota_exceeded" => Some(FailureKind::ProviderQuotaExceeded),
            "provider_unavailable" => Some(FailureKind::ProviderUnavailable),
            "provider_auth_error" => Some(FailureKind::ProviderAuthError),
            "provider_not_found" => Some(FailureKind::ProviderNotFound),
            "provider_error" => Some(FailureKind::ProviderError),
            "circuit_open" => Some(FailureKind::CircuitOpen),
            "timeout" => Some(FailureKind::Timeout),
            "result_fetch_failed" => Some(FailureKind::ResultFetchFailed),
            "queue_stuck" => Some(FailureKind::QueueStuck),
            "handoff_failed" => Some(FailureKind::HandoffFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job payload (opaque JSON: prompt, image data, generation parameters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Job Entity
///
/// A unit of work submitted by a caller and tracked against a remote
/// long-running operation at the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub operation_class: OperationClass,
    pub status: JobStatus,

    /// Opaque operation name returned by the provider once the remote
    /// operation starts. Absent while still queued.
    pub provider_handle: Option<String>,

    /// Bounded progress indicator (0..=100)
    pub progress_percent: i32,

    pub payload: JobPayload,

    /// Output URI, set only on Completed
    pub result_uri: Option<String>,

    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
}

impl Job {
    /// Create a new Job in Queued state
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `operation_class` - Rate-limit bucket / provider endpoint tag
    /// * `payload` - Opaque generation payload
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        operation_class: OperationClass,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            operation_class,
            status: JobStatus::Queued,
            provider_handle: None,
            progress_percent: 0,
            payload,
            result_uri: None,
            error_kind: None,
            error_message: None,
            created_at,
            updated_at: created_at,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Transition to Processing once the provider acknowledged the start
    pub fn begin_processing(
        &mut self,
        now_millis: i64,
        provider_handle: impl Into<String>,
    ) -> crate::domain::error::Result<()> {
        if self.status != JobStatus::Queued {
            return Err(crate::domain::error::DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: "PROCESSING".to_string(),
            });
        }
        self.status = JobStatus::Processing;
        self.provider_handle = Some(provider_handle.into());
        self.updated_at = now_millis;
        Ok(())
    }

    /// Terminal transition to Completed with a resolved result
    pub fn complete(
        &mut self,
        now_millis: i64,
        result_uri: Option<String>,
    ) -> crate::domain::error::Result<()> {
        if self.status != JobStatus::Processing {
            return Err(crate::domain::error::DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: "COMPLETED".to_string(),
            });
        }
        self.status = JobStatus::Completed;
        self.result_uri = result_uri;
        self.progress_percent = 100;
        self.completed_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Terminal transition to Failed with a classified error
    pub fn fail(
        &mut self,
        now_millis: i64,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> crate::domain::error::Result<()> {
        if self.status.is_terminal() {
            return Err(crate::domain::error::DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: "FAILED".to_string(),
            });
        }
        self.status = JobStatus::Failed;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        self.failed_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Age in milliseconds at the given instant
    pub fn age_ms(&self, now_millis: i64) -> i64 {
        now_millis - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::DomainError;

    fn test_job() -> Job {
        Job::new(
            "job-1",
            1_000,
            OperationClass::ImageToVideo,
            JobPayload::new(serde_json::json!({"prompt": "a cat"})),
        )
    }

    #[test]
    fn new_job_is_queued_without_handle() {
        let job = test_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.provider_handle.is_none());
        assert_eq!(job.progress_percent, 0);
    }

    #[test]
    fn lifecycle_queued_processing_completed() {
        let mut job = test_job();
        job.begin_processing(2_000, "operations/abc").unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.provider_handle.as_deref(), Some("operations/abc"));

        job.complete(3_000, Some("http://localhost/video.mp4".into()))
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert_eq!(job.completed_at, Some(3_000));
    }

    #[test]
    fn cannot_complete_from_queued() {
        let mut job = test_job();
        let err = job.complete(2_000, None).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidStatusTransition { .. }
        ));
    }

    #[test]
    fn terminal_status_cannot_be_overwritten() {
        let mut job = test_job();
        job.begin_processing(2_000, "operations/abc").unwrap();
        job.complete(3_000, Some("uri".into())).unwrap();

        let err = job
            .fail(4_000, FailureKind::Timeout, "stale sweep")
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn fail_records_kind_and_message() {
        let mut job = test_job();
        job.fail(2_000, FailureKind::ProviderNotFound, "not found upstream")
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_kind, Some(FailureKind::ProviderNotFound));
        assert_eq!(job.error_message.as_deref(), Some("not found upstream"));
        assert_eq!(job.failed_at, Some(2_000));
    }

    #[test]
    fn operation_class_round_trips() {
        for class in [
            OperationClass::TextToVideo,
            OperationClass::ImageToVideo,
            OperationClass::ImageEdit,
        ] {
            let parsed: OperationClass = class.as_str().parse().unwrap();
            assert_eq!(parsed, class);
        }
        assert!("VIDEO".parse::<OperationClass>().is_err());
    }
}
