// Genqueue Infrastructure - SQLite Adapter
// Implements: JobRepository, CallAudit

mod call_audit_impl;
mod connection;
mod job_repository;
mod migration;

pub use call_audit_impl::SqliteCallAudit;
pub use connection::create_pool;
pub use job_repository::SqliteJobRepository;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
