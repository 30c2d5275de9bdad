// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policy: decides whether a failed platform attempt is retried
//! and computes its exponential backoff delay.
//!
//! A transient failure with retries left consumes one retry and waits
//! `base * 2^retry_count`, capped. A permanent failure, or a transient
//! one at the ceiling, resolves the platform as failed — so
//! `retry_count` never exceeds the item's `max_retries` and a platform
//! gets at most `1 + max_retries` attempts.

use std::time::Duration;

use crosspost_core::error::PublishError;

use crate::config::EngineConfig;

/// Outcome of the retry decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Consume a retry and re-dispatch after this delay.
    RetryAfter(Duration),
    /// Resolve the platform as permanently failed.
    PlatformFailed,
}

/// Exponential backoff schedule with a cap.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    /// Delay before the retry that would become retry number
    /// `retry_count + 1`: `base * 2^retry_count`, capped.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }

    /// Decide the fate of a failed attempt given the retries already
    /// consumed for this platform.
    pub fn decide(
        &self,
        error: &PublishError,
        retry_count: u32,
        max_retries: u32,
    ) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::PlatformFailed;
        }
        if retry_count < max_retries {
            RetryDecision::RetryAfter(self.backoff_delay(retry_count))
        } else {
            RetryDecision::PlatformFailed
        }
    }
}
