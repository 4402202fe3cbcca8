// Port Layer - Interfaces to the outside world (Hexagonal Architecture)

pub mod call_audit;
pub mod id_provider;
pub mod job_repository;
pub mod provider;
pub mod time_provider;

pub use call_audit::{CallAudit, CallKind, ProviderCall};
pub use id_provider::{IdProvider, UuidProvider};
pub use job_repository::JobRepository;
pub use provider::{GenerationProvider, OperationStatus, ProviderError, StartRequest};
pub use time_provider::{SystemTimeProvider, TimeProvider};
