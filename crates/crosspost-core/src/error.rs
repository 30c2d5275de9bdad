// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Crosspost publishing queue engine.

use thiserror::Error;

use crate::types::{ItemId, ItemStatus, Platform};

/// The primary error type used across the queue store and engine operations.
#[derive(Debug, Error)]
pub enum CrosspostError {
    /// Configuration errors (invalid settings, empty platform list,
    /// unregistered platform at enqueue time).
    #[error("configuration error: {0}")]
    Config(String),

    /// No publisher adapter is registered for the requested platform.
    #[error("no publisher adapter registered for platform {platform}")]
    AdapterNotFound { platform: Platform },

    /// The referenced queue item does not exist.
    #[error("queue item not found: {id}")]
    ItemNotFound { id: ItemId },

    /// A status change was requested that is not an edge of the item
    /// state machine.
    #[error("invalid status transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },

    /// The operation was rejected because the engine is shutting down.
    #[error("engine is shutting down")]
    Shutdown,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure returned by a [`PublisherAdapter`](crate::PublisherAdapter)
/// publish attempt.
///
/// The variant decides the retry path: `Transient` failures are retried
/// with backoff up to the item's retry ceiling, `Permanent` failures
/// resolve the platform immediately, and `Cancelled` is produced only
/// when an emergency stop interrupts an in-flight attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Network timeout, 5xx, or platform rate limiting. Retried.
    #[error("transient platform failure: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid credentials, rejected content, or another non-retryable
    /// 4xx. Not retried.
    #[error("permanent platform failure: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The attempt was cancelled by an emergency stop before the
    /// platform confirmed the post.
    #[error("publish attempt cancelled")]
    Cancelled,
}

impl PublishError {
    /// Shorthand for a transient failure with no underlying source.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a permanent failure with no underlying source.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this failure is eligible for a retry attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(PublishError::transient("timeout").is_retryable());
        assert!(!PublishError::permanent("bad credentials").is_retryable());
        assert!(!PublishError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display_includes_platform() {
        let err = CrosspostError::AdapterNotFound {
            platform: Platform::Twitter,
        };
        assert!(err.to_string().contains("twitter"));
    }
}
