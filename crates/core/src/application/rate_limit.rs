// Sliding-window rate limiter
//
// Two trailing windows per operation class: requests per minute and requests
// per day. The day window is a trailing 24 hours, so quota recovers
// continuously instead of resetting at a wall-clock boundary.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::domain::OperationClass;
use crate::port::TimeProvider;

pub const MINUTE_WINDOW_MS: i64 = 60_000;
pub const DAY_WINDOW_MS: i64 = 86_400_000;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests_per_minute: u32,
    pub max_requests_per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 10,
            max_requests_per_day: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    MinuteLimitExceeded,
    DailyLimitExceeded,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::MinuteLimitExceeded => write!(f, "minute_limit_exceeded"),
            DenialReason::DailyLimitExceeded => write!(f, "daily_limit_exceeded"),
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub remaining_minute: u32,
    pub remaining_day: u32,
    /// Seconds until the oldest blocking window entry ages out. Zero when
    /// allowed.
    pub wait_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub used_minute: u32,
    pub used_day: u32,
    pub remaining_minute: u32,
    pub remaining_day: u32,
}

#[derive(Default)]
struct ClassWindows {
    minute: VecDeque<i64>,
    day: VecDeque<i64>,
}

impl ClassWindows {
    fn prune(&mut self, now: i64) {
        while self
            .minute
            .front()
            .is_some_and(|&t| now - t >= MINUTE_WINDOW_MS)
        {
            self.minute.pop_front();
        }
        while self.day.front().is_some_and(|&t| now - t >= DAY_WINDOW_MS) {
            self.day.pop_front();
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    time_provider: Arc<dyn TimeProvider>,
    windows: Mutex<HashMap<OperationClass, ClassWindows>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time_provider,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check admission without consuming quota.
    ///
    /// The daily limit is checked before the minute limit, so a daily denial
    /// never burns minute headroom.
    pub fn can_proceed(&self, class: OperationClass) -> Verdict {
        let now = self.time_provider.now_millis();
        let mut windows = self.windows.lock().unwrap();
        let w = windows.entry(class).or_default();
        w.prune(now);

        let used_minute = w.minute.len() as u32;
        let used_day = w.day.len() as u32;
        let remaining_minute = self.config.max_requests_per_minute.saturating_sub(used_minute);
        let remaining_day = self.config.max_requests_per_day.saturating_sub(used_day);

        if used_day >= self.config.max_requests_per_day {
            let wait = w
                .day
                .front()
                .map(|&oldest| wait_seconds(oldest, DAY_WINDOW_MS, now))
                .unwrap_or(0);
            return Verdict {
                allowed: false,
                reason: Some(DenialReason::DailyLimitExceeded),
                remaining_minute,
                remaining_day: 0,
                wait_seconds: wait,
            };
        }

        if used_minute >= self.config.max_requests_per_minute {
            let wait = w
                .minute
                .front()
                .map(|&oldest| wait_seconds(oldest, MINUTE_WINDOW_MS, now))
                .unwrap_or(0);
            return Verdict {
                allowed: false,
                reason: Some(DenialReason::MinuteLimitExceeded),
                remaining_minute: 0,
                remaining_day,
                wait_seconds: wait,
            };
        }

        Verdict {
            allowed: true,
            reason: None,
            remaining_minute,
            remaining_day,
            wait_seconds: 0,
        }
    }

    /// Consume one unit of quota in both windows. Call only after an allowed
    /// verdict, immediately before the provider call.
    pub fn record_request(&self, class: OperationClass) {
        let now = self.time_provider.now_millis();
        let mut windows = self.windows.lock().unwrap();
        let w = windows.entry(class).or_default();
        w.prune(now);
        w.minute.push_back(now);
        w.day.push_back(now);
    }

    pub fn usage(&self, class: OperationClass) -> UsageSnapshot {
        let now = self.time_provider.now_millis();
        let mut windows = self.windows.lock().unwrap();
        let w = windows.entry(class).or_default();
        w.prune(now);
        let used_minute = w.minute.len() as u32;
        let used_day = w.day.len() as u32;
        UsageSnapshot {
            used_minute,
            used_day,
            remaining_minute: self.config.max_requests_per_minute.saturating_sub(used_minute),
            remaining_day: self.config.max_requests_per_day.saturating_sub(used_day),
        }
    }
}

fn wait_seconds(oldest: i64, window_ms: i64, now: i64) -> i64 {
    let remaining_ms = (oldest + window_ms - now).max(0);
    (remaining_ms + 999) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    fn limiter(max_rpm: u32, max_rpd: u32) -> (RateLimiter, Arc<ManualTimeProvider>) {
        let time = Arc::new(ManualTimeProvider::new(1_700_000_000_000));
        let limiter = RateLimiter::new(
            RateLimitConfig {
                max_requests_per_minute: max_rpm,
                max_requests_per_day: max_rpd,
            },
            time.clone(),
        );
        (limiter, time)
    }

    #[test]
    fn allows_up_to_minute_limit_then_denies() {
        let (limiter, _) = limiter(10, 500);
        for _ in 0..10 {
            assert!(limiter.can_proceed(OperationClass::ImageToVideo).allowed);
            limiter.record_request(OperationClass::ImageToVideo);
        }
        let verdict = limiter.can_proceed(OperationClass::ImageToVideo);
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, Some(DenialReason::MinuteLimitExceeded));
        assert_eq!(verdict.remaining_minute, 0);
        assert!(verdict.wait_seconds > 0 && verdict.wait_seconds <= 60);
    }

    #[test]
    fn minute_window_slides() {
        let (limiter, time) = limiter(2, 500);
        limiter.record_request(OperationClass::ImageToVideo);
        limiter.record_request(OperationClass::ImageToVideo);
        assert!(!limiter.can_proceed(OperationClass::ImageToVideo).allowed);

        time.advance(MINUTE_WINDOW_MS);
        let verdict = limiter.can_proceed(OperationClass::ImageToVideo);
        assert!(verdict.allowed);
        assert_eq!(verdict.remaining_minute, 2);
    }

    #[test]
    fn daily_limit_checked_before_minute_limit() {
        let (limiter, time) = limiter(10, 3);
        for _ in 0..3 {
            limiter.record_request(OperationClass::TextToVideo);
        }
        // minute window has headroom left, but the day is exhausted
        time.advance(MINUTE_WINDOW_MS);
        let verdict = limiter.can_proceed(OperationClass::TextToVideo);
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, Some(DenialReason::DailyLimitExceeded));
        assert!(verdict.wait_seconds > 0);
    }

    #[test]
    fn day_quota_recovers_as_trailing_window_ages() {
        let (limiter, time) = limiter(10, 2);
        limiter.record_request(OperationClass::ImageEdit);
        time.advance(DAY_WINDOW_MS / 2);
        limiter.record_request(OperationClass::ImageEdit);
        assert!(!limiter.can_proceed(OperationClass::ImageEdit).allowed);

        // first entry ages out after the remaining half day
        time.advance(DAY_WINDOW_MS / 2);
        let verdict = limiter.can_proceed(OperationClass::ImageEdit);
        assert!(verdict.allowed);
        assert_eq!(verdict.remaining_day, 1);
    }

    #[test]
    fn classes_have_independent_budgets() {
        let (limiter, _) = limiter(1, 500);
        limiter.record_request(OperationClass::TextToVideo);
        assert!(!limiter.can_proceed(OperationClass::TextToVideo).allowed);
        assert!(limiter.can_proceed(OperationClass::ImageToVideo).allowed);
    }

    #[test]
    fn check_does_not_consume_quota() {
        let (limiter, _) = limiter(1, 500);
        for _ in 0..5 {
            assert!(limiter.can_proceed(OperationClass::ImageToVideo).allowed);
        }
        let usage = limiter.usage(OperationClass::ImageToVideo);
        assert_eq!(usage.used_minute, 0);
    }
}
