//! Process-wide monotonic clock.
//!
//! Every timestamp in the engine (captured notes, scheduled output, tick
//! times) is an `f64` number of seconds on this clock. The epoch is fixed the
//! first time the clock is read, so readings are small, positive and never go
//! backwards.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Stand-in for "never" when a deadline is infinite or out of range.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[inline]
fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Current clock time in seconds.
#[inline]
pub fn now() -> f64 {
    epoch().elapsed().as_secs_f64()
}

/// The [`Instant`] corresponding to a clock time. Negative times clamp to the
/// epoch; infinite times map to a deadline a year out.
pub fn instant_at(time: f64) -> Instant {
    let start = epoch();
    let offset = Duration::try_from_secs_f64(time.max(0.0)).unwrap_or(FAR_FUTURE);
    start
        .checked_add(offset)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Time left until `time`, or zero if it has already passed. Times too far
/// out to represent saturate at a year.
pub fn duration_until(time: f64) -> Duration {
    let remaining = time - now();
    if remaining > 0.0 {
        Duration::try_from_secs_f64(remaining).unwrap_or(FAR_FUTURE)
    } else {
        Duration::ZERO
    }
}

/// Blocks the current thread until the clock reaches `time`.
pub fn sleep_until(time: f64) {
    let wait = duration_until(time);
    if !wait.is_zero() {
        std::thread::sleep(wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
        assert!(a >= 0.0);
    }

    #[test]
    fn test_duration_until_past_is_zero() {
        assert_eq!(duration_until(now() - 1.0), Duration::ZERO);
        assert_eq!(duration_until(f64::NEG_INFINITY), Duration::ZERO);
        assert_eq!(duration_until(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_duration_until_infinity_saturates() {
        assert_eq!(duration_until(f64::INFINITY), FAR_FUTURE);
    }

    #[test]
    fn test_sleep_until_reaches_target() {
        let target = now() + 0.02;
        sleep_until(target);
        assert!(now() >= target);
    }

    #[test]
    fn test_instant_at_round_trip() {
        let t = now() + 0.5;
        let instant = instant_at(t);
        let back = instant.duration_since(instant_at(0.0)).as_secs_f64();
        assert!((back - t).abs() < 1e-6);
    }
}
