// ID Provider Port - injectable ID generation

/// Generates unique job IDs
pub trait IdProvider: Send + Sync {
    fn generate(&self) -> String;
}

/// UUID v4 implementation
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

pub mod mocks {
    use super::IdProvider;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential ID generator for deterministic tests
    pub struct SequentialIdProvider {
        counter: AtomicU64,
        prefix: String,
    }

    impl SequentialIdProvider {
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                counter: AtomicU64::new(0),
                prefix: prefix.into(),
            }
        }
    }

    impl IdProvider for SequentialIdProvider {
        fn generate(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("{}-{}", self.prefix, n)
        }
    }
}
