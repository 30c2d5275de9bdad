// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Publisher adapter trait for per-platform delivery clients
//! (LinkedIn, Twitter, email, blog, etc.).

use async_trait::async_trait;

use crate::error::PublishError;
use crate::types::{ContentPayload, Platform, PublishReceipt};

/// Adapter for delivering a rendered content payload to one platform.
///
/// Adapters are assumed to be idempotent-unsafe: the engine never
/// dispatches two concurrent attempts for the same (item, platform)
/// pair. Implementations should honor task cancellation at their await
/// points; an attempt cancelled by an emergency stop is recorded as
/// cancelled, not failed.
#[async_trait]
pub trait PublisherAdapter: Send + Sync + 'static {
    /// The platform this adapter delivers to.
    fn platform(&self) -> Platform;

    /// Human-readable name of this adapter instance.
    fn name(&self) -> &str;

    /// Deliver the payload. `metadata` is the item's free-form
    /// attribute map (hashtags, mentions, media references), passed
    /// through unchanged.
    async fn publish(
        &self,
        payload: &ContentPayload,
        metadata: &serde_json::Value,
    ) -> Result<PublishReceipt, PublishError>;
}
