// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock publisher adapter for deterministic testing.
//!
//! `MockPublisher` implements `PublisherAdapter` with a scripted outcome
//! per attempt and captures every successfully published payload for
//! assertion in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crosspost_core::error::PublishError;
use crosspost_core::traits::publisher::PublisherAdapter;
use crosspost_core::types::{ContentPayload, Platform, PublishReceipt};

/// How the mock responds to successive publish attempts.
#[derive(Debug, Clone, Copy)]
pub enum PublishScript {
    /// Every attempt succeeds.
    AlwaysSucceed,
    /// Every attempt fails with a transient error.
    AlwaysTransient,
    /// Every attempt fails with a permanent error.
    AlwaysPermanent,
    /// The first `failures` attempts fail transiently, then attempts
    /// succeed.
    FailThenSucceed { failures: u32 },
}

/// A mock platform publisher for testing.
///
/// Tracks the total attempt count and captures the payload of every
/// successful publish, retrievable via `published()`.
pub struct MockPublisher {
    platform: Platform,
    script: PublishScript,
    delay: Option<Duration>,
    calls: Arc<Mutex<u32>>,
    published: Arc<Mutex<Vec<ContentPayload>>>,
}

impl MockPublisher {
    /// Create a mock that always succeeds.
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            script: PublishScript::AlwaysSucceed,
            delay: None,
            calls: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the outcome script.
    pub fn with_script(mut self, script: PublishScript) -> Self {
        self.script = script;
        self
    }

    /// Sleep this long inside every publish attempt, simulating a slow
    /// platform API (and giving cancellation a window in stop tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total publish attempts made against this mock.
    pub async fn calls(&self) -> u32 {
        *self.calls.lock().await
    }

    /// Payloads of every successful publish, in order.
    pub async fn published(&self) -> Vec<ContentPayload> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl PublisherAdapter for MockPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn name(&self) -> &str {
        "mock-publisher"
    }

    async fn publish(
        &self,
        payload: &ContentPayload,
        _metadata: &serde_json::Value,
    ) -> Result<PublishReceipt, PublishError> {
        let attempt = {
            let mut calls = self.calls.lock().await;
            *calls += 1;
            *calls
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let succeed = match self.script {
            PublishScript::AlwaysSucceed => true,
            PublishScript::AlwaysTransient => {
                return Err(PublishError::transient("simulated timeout"));
            }
            PublishScript::AlwaysPermanent => {
                return Err(PublishError::permanent("simulated rejection"));
            }
            PublishScript::FailThenSucceed { failures } => attempt > failures,
        };

        if succeed {
            self.published.lock().await.push(payload.clone());
            Ok(PublishReceipt {
                post_id: Some(format!("mock-{}-{}", self.platform, uuid::Uuid::new_v4())),
            })
        } else {
            Err(PublishError::transient("simulated timeout"))
        }
    }
}
