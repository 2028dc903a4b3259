//! Exponential backoff between policy fetch attempts.

use std::time::Duration;

/// Delay to wait after failed attempt number `attempt` (1-based).
///
/// Doubles from `base` and saturates at `max`: with a 1s base the waits
/// are 1s, 2s, 4s, 8s, ... up to `max`. Attempt 0 waits nothing.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}
