//! Fixed-window rate limiting for authentication endpoints.
//!
//! One counter per client address across *all* authentication-relevant
//! endpoints: login, onboarding, and anything else that verifies a secret.
//! The window is fixed, not sliding; the first attempt after a window rolls
//! over starts a fresh count.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;

/// Default limiting window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default attempts allowed per window.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: u64,
    attempts: u32,
}

/// Per-address fixed-window counter.
pub struct FixedWindowLimiter {
    window: Duration,
    max_attempts: u32,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max_attempts: u32) -> Self {
        Self {
            window,
            max_attempts,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Count an attempt. `Err(retry_after_secs)` means the address is over
    /// its budget; the value is always at least 1 so a `Retry-After` header
    /// never tells the client to retry immediately.
    pub fn try_acquire(&self, addr: IpAddr, now: u64) -> std::result::Result<(), u64> {
        let mut windows = self.windows.lock();
        let window_secs = self.window.as_secs();

        let entry = windows.entry(addr).or_insert(Window {
            started_at: now,
            attempts: 0,
        });

        if now.saturating_sub(entry.started_at) >= window_secs {
            entry.started_at = now;
            entry.attempts = 0;
        }

        if entry.attempts >= self.max_attempts {
            let retry_after = (entry.started_at + window_secs).saturating_sub(now).max(1);
            return Err(retry_after);
        }

        entry.attempts += 1;
        Ok(())
    }

    /// Drop windows that ended before `now`. Called opportunistically by the
    /// token reaper so the map cannot grow without bound.
    pub fn prune(&self, now: u64) {
        let window_secs = self.window.as_secs();
        self.windows
            .lock()
            .retain(|_, w| now.saturating_sub(w.started_at) < window_secs);
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_ATTEMPTS)
    }
}
