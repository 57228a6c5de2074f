//! Exponential backoff with jitter for outbound retries.
use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based).
///
/// Doubles from `min` on each attempt, capped at `max`, plus up to 10% jitter
/// (never past `max`). Attempt 0 waits nothing.
pub fn calculate_backoff(attempt: u32, min: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(attempt - 1);
    let capped = min.saturating_mul(factor).min(max);

    let jitter_range = capped.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::rng().random_range(0..jitter_range)
    } else {
        0
    };

    (capped + Duration::from_millis(jitter)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(2000);

        assert_eq!(calculate_backoff(0, min, max), Duration::ZERO);

        let b1 = calculate_backoff(1, min, max);
        assert!(b1 >= Duration::from_millis(100) && b1 < Duration::from_millis(110));

        let b2 = calculate_backoff(2, min, max);
        assert!(b2 >= Duration::from_millis(200));

        assert_eq!(calculate_backoff(10, min, max), max);
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let max = Duration::from_secs(30);
        assert_eq!(calculate_backoff(u32::MAX, Duration::from_secs(1), max), max);
    }
}
