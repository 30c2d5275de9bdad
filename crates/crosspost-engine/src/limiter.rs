// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-platform fixed-window rate limiting.
//!
//! The coordinator checks the limiter before every dispatch; an
//! exhausted window defers the attempt to a later tick rather than
//! counting it as a failure. The limiter lives inside the coordinator
//! (the single dispatching task), so no locking is needed here — the
//! per-platform semaphores bound the concurrency of attempts already
//! in flight.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crosspost_core::types::Platform;

struct Window {
    started_at: DateTime<Utc>,
    used: u32,
}

/// Fixed-window dispatch budget per platform.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    windows: HashMap<Platform, Window>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self {
            max_per_window,
            window: Duration::milliseconds(window_ms as i64),
            windows: HashMap::new(),
        }
    }

    /// Consume one dispatch token for the platform, rolling the window
    /// forward when it has elapsed. Returns false when the current
    /// window's budget is spent.
    pub fn try_acquire(&mut self, platform: Platform, now: DateTime<Utc>) -> bool {
        let window = self.windows.entry(platform).or_insert(Window {
            started_at: now,
            used: 0,
        });
        if now - window.started_at >= self.window {
            window.started_at = now;
            window.used = 0;
        }
        if window.used < self.max_per_window {
            window.used += 1;
            true
        } else {
            false
        }
    }

    /// Return a token taken by `try_acquire` whose dispatch never
    /// happened, so an aborted dispatch does not shrink the window's
    /// budget.
    pub fn release(&mut self, platform: Platform) {
        if let Some(window) = self.windows.get_mut(&platform) {
            window.used = window.used.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhausts_within_window() {
        let mut limiter = RateLimiter::new(2, 60_000);
        let now = Utc::now();
        assert!(limiter.try_acquire(Platform::Twitter, now));
        assert!(limiter.try_acquire(Platform::Twitter, now));
        assert!(!limiter.try_acquire(Platform::Twitter, now));
    }

    #[test]
    fn platforms_have_independent_budgets() {
        let mut limiter = RateLimiter::new(1, 60_000);
        let now = Utc::now();
        assert!(limiter.try_acquire(Platform::Twitter, now));
        assert!(!limiter.try_acquire(Platform::Twitter, now));
        assert!(limiter.try_acquire(Platform::LinkedIn, now));
    }

    #[test]
    fn released_token_returns_to_window() {
        let mut limiter = RateLimiter::new(1, 60_000);
        let now = Utc::now();
        assert!(limiter.try_acquire(Platform::Twitter, now));
        assert!(!limiter.try_acquire(Platform::Twitter, now));

        limiter.release(Platform::Twitter);
        assert!(limiter.try_acquire(Platform::Twitter, now));
    }

    #[test]
    fn window_rolls_over() {
        let mut limiter = RateLimiter::new(1, 1_000);
        let now = Utc::now();
        assert!(limiter.try_acquire(Platform::Email, now));
        assert!(!limiter.try_acquire(Platform::Email, now));

        let later = now + Duration::milliseconds(1_000);
        assert!(limiter.try_acquire(Platform::Email, later));
    }
}
