// Domain Layer - Entities and domain errors

pub mod error;
pub mod job;

pub use error::{DomainError, Result};
pub use job::{FailureKind, Job, JobId, JobPayload, JobStatus, OperationClass};
