//! Unix-time helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Normalize a client-supplied timestamp to seconds.
///
/// Values above 10^12 can only be milliseconds; everything else is taken as
/// seconds already.
pub fn normalize_timestamp(ts: u64) -> u64 {
    if ts > 1_000_000_000_000 {
        ts / 1000
    } else {
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_timestamps_convert_to_seconds() {
        assert_eq!(normalize_timestamp(1_700_000_000_123), 1_700_000_000);
        assert_eq!(normalize_timestamp(1_700_000_000), 1_700_000_000);
        assert_eq!(normalize_timestamp(0), 0);
    }
}
