// Call Audit Port - record of every outbound provider call

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Start,
    Poll,
    Result,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Start => "start",
            CallKind::Poll => "poll",
            CallKind::Result => "result",
        }
    }
}

/// One outbound provider call, success or failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCall {
    pub job_id: Option<String>,
    pub handle: Option<String>,
    pub kind: CallKind,
    pub status_code: Option<u16>,
    pub ok: bool,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: i64,
}

#[async_trait]
pub trait CallAudit: Send + Sync {
    async fn record(&self, call: ProviderCall) -> Result<()>;

    /// Delete audit records older than the cutoff. Returns rows removed.
    async fn purge_older_than(&self, cutoff_millis: i64) -> Result<u64>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// In-memory audit sink for tests
    pub struct MemoryCallAudit {
        calls: Mutex<Vec<ProviderCall>>,
    }

    impl MemoryCallAudit {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn recorded(&self) -> Vec<ProviderCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Default for MemoryCallAudit {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CallAudit for MemoryCallAudit {
        async fn record(&self, call: ProviderCall) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        async fn purge_older_than(&self, cutoff_millis: i64) -> Result<u64> {
            let mut calls = self.calls.lock().unwrap();
            let before = calls.len();
            calls.retain(|c| c.created_at >= cutoff_millis);
            Ok((before - calls.len()) as u64)
        }
    }
}
