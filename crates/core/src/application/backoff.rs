// Retry backoff calculation

/// Exponential backoff delay for the given attempt, capped at `max_ms`.
/// Attempt 0 waits `base_ms`, attempt 1 waits `2 * base_ms`, and so on.
pub fn retry_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_cap() {
        assert_eq!(retry_delay_ms(0, 60_000, 600_000), 60_000);
        assert_eq!(retry_delay_ms(1, 60_000, 600_000), 120_000);
        assert_eq!(retry_delay_ms(2, 60_000, 600_000), 240_000);
        assert_eq!(retry_delay_ms(3, 60_000, 600_000), 480_000);
        assert_eq!(retry_delay_ms(4, 60_000, 600_000), 600_000);
        assert_eq!(retry_delay_ms(10, 60_000, 600_000), 600_000);
    }

    #[test]
    fn large_attempt_does_not_overflow() {
        assert_eq!(retry_delay_ms(64, 60_000, 600_000), 600_000);
    }
}
