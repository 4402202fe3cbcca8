// Circuit breaker around the generation provider
//
// Closed -> Open after a run of consecutive failures. Open -> HalfOpen once
// the recovery timeout elapses; exactly one probe call is let through, and
// its outcome decides Closed vs Open again. Transitions are lazy: they
// happen when a call arrives, there is no background timer.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::port::{ProviderError, TimeProvider};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<i64>,
    pub is_available: bool,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<i64>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    time_provider: Arc<dyn TimeProvider>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time_provider,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Run a provider call through the breaker.
    ///
    /// Rejected calls fail fast with `CircuitOpen` and never invoke the
    /// closure.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.pre_check()?;
        match call().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn pre_check(&self) -> Result<(), ProviderError> {
        let now = self.time_provider.now_millis();
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| now - t)
                    .unwrap_or(i64::MAX);
                if elapsed >= self.config.recovery_timeout_ms {
                    // this caller becomes the probe
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker half-open, probing provider");
                    Ok(())
                } else {
                    let retry_after_secs =
                        (self.config.recovery_timeout_ms - elapsed + 999) / 1000;
                    Err(ProviderError::CircuitOpen { retry_after_secs })
                }
            }
            // a probe is already in flight
            CircuitState::HalfOpen => {
                let retry_after_secs = (self.config.recovery_timeout_ms + 999) / 1000;
                Err(ProviderError::CircuitOpen { retry_after_secs })
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            info!("Circuit breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
    }

    fn on_failure(&self) {
        let now = self.time_provider.now_millis();
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure_at = Some(now);
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("Circuit breaker probe failed, reopening");
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                warn!(
                    failure_count = inner.failure_count,
                    "Circuit breaker opened"
                );
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.time_provider.now_millis();
        let inner = self.inner.lock().unwrap();
        let is_available = match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => inner
                .last_failure_at
                .map(|t| now - t >= self.config.recovery_timeout_ms)
                .unwrap_or(true),
        };
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            is_available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker() -> (CircuitBreaker, Arc<ManualTimeProvider>) {
        let time = Arc::new(ManualTimeProvider::new(1_000_000));
        let breaker = CircuitBreaker::new(BreakerConfig::default(), time.clone());
        (breaker, time)
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .execute(|| async {
                Err::<(), _>(ProviderError::Unavailable {
                    status: 503,
                    message: "down".into(),
                })
            })
            .await;
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let (breaker, _) = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_calling() {
        let (breaker, _) = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let calls = AtomicUsize::new(0);
        let result = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(())
            })
            .await;
        assert!(matches!(result, Err(ProviderError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_probe_closes_circuit() {
        let (breaker, time) = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }
        time.advance(300_000);

        let result = breaker.execute(|| async { Ok::<_, ProviderError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test]
    async fn failed_probe_reopens_circuit() {
        let (breaker, time) = breaker();
        for _ in 0..3 {
            fail(&breaker).await;
        }
        time.advance(300_000);
        fail(&breaker).await;
        assert_eq!(breaker.snapshot().state, CircuitState::Open);

        // still rejecting until another full recovery timeout passes
        let result = breaker
            .execute(|| async { Ok::<_, ProviderError>(()) })
            .await;
        assert!(matches!(result, Err(ProviderError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let (breaker, _) = breaker();
        fail(&breaker).await;
        fail(&breaker).await;
        let _ = breaker.execute(|| async { Ok::<_, ProviderError>(()) }).await;
        fail(&breaker).await;
        fail(&breaker).await;
        // two failures after reset, still below threshold
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }
}
