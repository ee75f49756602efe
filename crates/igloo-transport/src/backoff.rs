//! Reconnect backoff.
//!
//! Full-jitter exponential backoff: `min(cap, base · 2^attempts)` plus a
//! random 0–1s. Attempts reset to zero when a connection reaches ready, so
//! the first delay after a healthy stretch lands back in `[base, base + 1s]`.

use std::time::Duration;

use rand::Rng;

/// Ceiling for the deterministic part of the delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// First-attempt delay.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Upper bound of the jitter added to every delay.
pub const JITTER_MAX: Duration = Duration::from_secs(1);

/// Deterministic part of the delay for the given attempt count.
pub fn backoff_delay(attempts: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u64 << attempts.min(16);
    base.checked_mul(factor as u32).unwrap_or(cap).min(cap)
}

/// Add full jitter: a uniformly random 0..1s on top.
pub fn jittered(delay: Duration) -> Duration {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MAX.as_millis() as u64));
    delay + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_the_cap() {
        let delays: Vec<u64> = (0..8)
            .map(|n| backoff_delay(n, BACKOFF_BASE, BACKOFF_CAP).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn delays_are_monotone_and_bounded_by_double_plus_jitter() {
        let mut previous = backoff_delay(0, BACKOFF_BASE, BACKOFF_CAP);
        for n in 1..12 {
            let current = backoff_delay(n, BACKOFF_BASE, BACKOFF_CAP);
            assert!(current >= previous);
            assert!(current <= previous * 2 + JITTER_MAX);
            previous = current;
        }
    }

    #[test]
    fn reset_lands_in_the_first_window() {
        // After a ready, attempts restart at zero.
        for _ in 0..32 {
            let delay = jittered(backoff_delay(0, BACKOFF_BASE, BACKOFF_CAP));
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_secs(2));
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        assert_eq!(backoff_delay(u32::MAX, BACKOFF_BASE, BACKOFF_CAP), BACKOFF_CAP);
    }
}
