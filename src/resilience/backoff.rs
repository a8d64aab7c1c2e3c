//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Upper bound on the random jitter added to any retry delay.
pub const MAX_JITTER: Duration = Duration::from_secs(1);

/// Exponential delay without jitter: `base * 2^(attempt - 1)`, capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(exponential_base).min(max)
}

/// Add up to `max_jitter` of random delay.
pub fn with_jitter(delay: Duration, max_jitter: Duration) -> Duration {
    let jitter_ms = max_jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

/// Delay before re-queueing an item after its `attempt`-th failure.
pub fn retry_delay(attempt: u32, base: Duration, max: Duration, max_jitter: Duration) -> Duration {
    with_jitter(calculate_backoff(attempt, base, max), max_jitter)
}

/// Parse a `Retry-After` header value given in (possibly fractional) seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_millis((secs * 1000.0).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(2000);
        assert_eq!(calculate_backoff(0, base, max), Duration::ZERO);
        assert_eq!(calculate_backoff(1, base, max), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, base, max), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, base, max), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10, base, Duration::from_millis(1000)), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(64, base, max), max);
    }

    #[test]
    fn test_jitter_is_bounded() {
        let delay = Duration::from_secs(2);
        for _ in 0..100 {
            let jittered = with_jitter(delay, MAX_JITTER);
            assert!(jittered >= delay);
            assert!(jittered <= delay + MAX_JITTER);
        }
        assert_eq!(with_jitter(delay, Duration::ZERO), delay);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_millis(2000)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
