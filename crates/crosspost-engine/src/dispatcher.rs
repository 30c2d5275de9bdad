// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The scheduler loop: ticks over the due index, fans platform attempts
//! out to worker tasks, and folds their results back into the store.
//!
//! The loop is the only writer of item status while it runs. Workers
//! never touch the store; they report through an mpsc channel and the
//! loop applies the outcome. That keeps every status decision (retry
//! accounting, terminal resolution) in one place, ordered.
//!
//! Two cancellation tokens shape shutdown: `stop` drains in-flight
//! attempts and exits, `kill` aborts them and cancels whatever was
//! still processing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crosspost_core::error::PublishError;
use crosspost_core::types::{
    ItemId, ItemStatus, Platform, PublishReceipt, PublishingItem, QueueFilter,
};
use crosspost_core::PublisherAdapter;
use crosspost_queue::QueueStore;

use crate::config::EngineConfig;
use crate::registry::AdapterRegistry;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::limiter::RateLimiter;

/// How long an emergency stop waits for workers to acknowledge the kill
/// token before their attempts are written off as cancelled.
const KILL_GRACE: Duration = Duration::from_secs(1);

enum AttemptOutcome {
    Success(PublishReceipt),
    Failure(PublishError),
    Cancelled,
}

/// One worker's report for a single `(item, platform)` attempt.
struct AttemptResult {
    item_id: ItemId,
    platform: Platform,
    outcome: AttemptOutcome,
}

pub(crate) struct Dispatcher {
    store: Arc<QueueStore>,
    registry: Arc<AdapterRegistry>,
    config: EngineConfig,
    policy: RetryPolicy,
    limiter: RateLimiter,
    /// Per-platform concurrency pools, created on first dispatch.
    pools: HashMap<Platform, Arc<Semaphore>>,
    /// Outstanding `(item, platform)` attempts. Guards against
    /// double-dispatching a pair whose item is still in the due index.
    in_flight: HashSet<(ItemId, Platform)>,
    results_tx: mpsc::Sender<AttemptResult>,
    results_rx: mpsc::Receiver<AttemptResult>,
    stop: CancellationToken,
    kill: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<QueueStore>,
        registry: Arc<AdapterRegistry>,
        config: EngineConfig,
        stop: CancellationToken,
        kill: CancellationToken,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::channel(config.result_channel_capacity);
        let policy = RetryPolicy::from_config(&config);
        let limiter = RateLimiter::new(config.rate_limit_per_window, config.rate_limit_window_ms);
        Self {
            store,
            registry,
            config,
            policy,
            limiter,
            pools: HashMap::new(),
            in_flight: HashSet::new(),
            results_tx,
            results_rx,
            stop,
            kill,
        }
    }

    /// Run until stopped. Results are folded in as they arrive; the due
    /// index is scanned once per tick.
    pub(crate) async fn run(mut self) {
        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            tick_ms = self.config.tick_interval_ms,
            "scheduler loop started"
        );
        loop {
            tokio::select! {
                biased;
                _ = self.kill.cancelled() => {
                    self.shutdown_immediate().await;
                    return;
                }
                _ = self.stop.cancelled() => {
                    self.drain().await;
                    return;
                }
                Some(result) = self.results_rx.recv() => self.handle_result(result),
                _ = tick.tick() => self.dispatch_due(),
            }
        }
    }

    /// Scan the due prefix and dispatch every unresolved platform that
    /// has capacity. Exhausted rate windows or full pools defer the
    /// pair to a later tick without consuming anything.
    fn dispatch_due(&mut self) {
        let now = Utc::now();
        for item in self.store.list_due(now, self.config.dispatch_batch) {
            for platform in item.unresolved_platforms() {
                if self.in_flight.contains(&(item.id, platform)) {
                    continue;
                }
                // A platform waiting out its backoff is due only once
                // its own deadline passes, even if a sibling platform
                // made the item due earlier.
                if item
                    .results
                    .get(&platform)
                    .and_then(|r| r.next_attempt_at)
                    .is_some_and(|at| at > now)
                {
                    continue;
                }
                let Some(adapter) = self.registry.get(platform) else {
                    // Enqueue validation makes this unreachable unless
                    // the registry changed underneath a stored item.
                    warn!(item_id = %item.id, platform = %platform, "no adapter registered");
                    self.record(
                        item.id,
                        self.store.mark_platform_failed(
                            item.id,
                            platform,
                            format!("no adapter registered for {platform}"),
                        ),
                    );
                    continue;
                };
                let pool = self
                    .pools
                    .entry(platform)
                    .or_insert_with(|| Arc::new(Semaphore::new(self.config.platform_concurrency)))
                    .clone();
                let Ok(permit) = pool.try_acquire_owned() else {
                    debug!(platform = %platform, "platform pool full, deferring");
                    continue;
                };
                if !self.limiter.try_acquire(platform, now) {
                    debug!(platform = %platform, "rate window exhausted, deferring");
                    continue;
                }
                if let Err(error) = self.store.begin_processing(item.id, now) {
                    warn!(item_id = %item.id, %error, "could not move item to processing");
                    // The attempt never launches; give the token back.
                    self.limiter.release(platform);
                    continue;
                }
                self.in_flight.insert((item.id, platform));
                self.spawn_attempt(&item, platform, adapter, permit);
            }
        }
    }

    fn spawn_attempt(
        &self,
        item: &PublishingItem,
        platform: Platform,
        adapter: Arc<dyn PublisherAdapter>,
        permit: OwnedSemaphorePermit,
    ) {
        let payload = item.payload();
        let metadata = item.metadata.clone();
        let item_id = item.id;
        let tx = self.results_tx.clone();
        let kill = self.kill.clone();
        debug!(item_id = %item_id, platform = %platform, "dispatching attempt");
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = tokio::select! {
                _ = kill.cancelled() => AttemptOutcome::Cancelled,
                result = adapter.publish(&payload, &metadata) => match result {
                    Ok(receipt) => AttemptOutcome::Success(receipt),
                    Err(PublishError::Cancelled) => AttemptOutcome::Cancelled,
                    Err(error) => AttemptOutcome::Failure(error),
                },
            };
            // The loop only drops the receiver on its way out.
            let _ = tx
                .send(AttemptResult {
                    item_id,
                    platform,
                    outcome,
                })
                .await;
        });
    }

    /// Fold one worker report into the store, then finalize the item if
    /// that resolved its last platform.
    fn handle_result(&mut self, result: AttemptResult) {
        let AttemptResult {
            item_id,
            platform,
            outcome,
        } = result;
        self.in_flight.remove(&(item_id, platform));
        let now = Utc::now();

        let stored = match outcome {
            AttemptOutcome::Success(receipt) => {
                info!(item_id = %item_id, platform = %platform, "publish succeeded");
                self.store.record_success(item_id, platform, receipt, now)
            }
            AttemptOutcome::Failure(error) => match self.store.get(item_id) {
                None => {
                    warn!(item_id = %item_id, "result for unknown item dropped");
                    return;
                }
                Some(item) => {
                    let retry_count = item
                        .results
                        .get(&platform)
                        .map(|r| r.retry_count)
                        .unwrap_or(0);
                    match self.policy.decide(&error, retry_count, item.max_retries) {
                        RetryDecision::RetryAfter(delay) => {
                            let next_attempt_at =
                                now + chrono::Duration::milliseconds(delay.as_millis() as i64);
                            warn!(
                                item_id = %item_id,
                                platform = %platform,
                                retry = retry_count + 1,
                                next_attempt_at = %next_attempt_at,
                                %error,
                                "publish failed, retry scheduled"
                            );
                            self.store.record_retry(
                                item_id,
                                platform,
                                error.to_string(),
                                next_attempt_at,
                                now,
                            )
                        }
                        RetryDecision::PlatformFailed => {
                            warn!(
                                item_id = %item_id,
                                platform = %platform,
                                retries_used = retry_count,
                                %error,
                                "publish failed permanently"
                            );
                            self.store
                                .mark_platform_failed(item_id, platform, error.to_string())
                        }
                    }
                }
            },
            AttemptOutcome::Cancelled => {
                info!(item_id = %item_id, platform = %platform, "attempt cancelled");
                self.store.mark_platform_cancelled(item_id, platform)
            }
        };
        self.record(item_id, stored);
    }

    /// Apply a store write's result, finalizing on success. Store
    /// errors are logged; the loop never dies on one.
    fn record(&self, item_id: ItemId, stored: Result<(), crosspost_core::CrosspostError>) {
        if let Err(error) = stored {
            warn!(item_id = %item_id, %error, "failed to record attempt result");
            return;
        }
        if let Err(error) = self.store.finalize_if_resolved(item_id, Utc::now()) {
            warn!(item_id = %item_id, %error, "failed to finalize item");
        }
    }

    /// Graceful stop: no new dispatches, wait for in-flight attempts to
    /// report. Escalates to an emergency stop if the drain window runs
    /// out.
    async fn drain(&mut self) {
        info!(
            in_flight = self.in_flight.len(),
            "stopping, draining in-flight attempts"
        );
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout();
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.results_rx.recv()).await {
                Ok(Some(result)) => self.handle_result(result),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.in_flight.len(),
                        "drain window elapsed, cancelling remaining attempts"
                    );
                    self.kill.cancel();
                    self.shutdown_immediate().await;
                    return;
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Emergency stop: workers see the kill token and report cancelled;
    /// anything that does not report within the grace window is written
    /// off. No item is left in `processing`.
    async fn shutdown_immediate(&mut self) {
        warn!(
            in_flight = self.in_flight.len(),
            "emergency stop, cancelling in-flight attempts"
        );
        let deadline = tokio::time::Instant::now() + KILL_GRACE;
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.results_rx.recv()).await {
                Ok(Some(result)) => self.handle_result(result),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let now = Utc::now();
        for (item_id, platform) in std::mem::take(&mut self.in_flight) {
            if let Err(error) = self.store.mark_platform_cancelled(item_id, platform) {
                warn!(item_id = %item_id, %error, "failed to cancel unreported attempt");
            }
        }
        // Anything still processing had unresolved platforms; cancel it
        // outright so nothing is stranded mid-flight. Scheduled and
        // retrying items are left alone for a later restart.
        let processing = self.store.items(&QueueFilter {
            status: Some(ItemStatus::Processing),
            ..QueueFilter::default()
        });
        for item in processing {
            if let Err(error) = self.store.cancel(item.id, now) {
                warn!(item_id = %item.id, %error, "failed to cancel processing item");
            }
        }
        warn!("scheduler halted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosspost_core::types::NewItem;
    use crosspost_test_utils::MockPublisher;

    fn dispatcher(registry: AdapterRegistry, config: EngineConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(QueueStore::new()),
            Arc::new(registry),
            config,
            CancellationToken::new(),
            CancellationToken::new(),
        )
    }

    fn item(platforms: Vec<Platform>) -> NewItem {
        NewItem::new("c-1", "title", "body", platforms, Utc::now())
    }

    #[tokio::test]
    async fn missing_adapter_resolves_platform_failed() {
        let mut d = dispatcher(AdapterRegistry::new(), EngineConfig::default());
        let id = d.store.enqueue(item(vec![Platform::Twitter])).unwrap();

        d.dispatch_due();

        let stored = d.store.get(id).unwrap();
        assert_eq!(stored.status, ItemStatus::Failed);
        assert!(d.in_flight.is_empty());
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_attempts_per_platform() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(
            MockPublisher::new(Platform::Twitter).with_delay(Duration::from_secs(60)),
        ));
        let config = EngineConfig {
            platform_concurrency: 1,
            ..EngineConfig::default()
        };
        let mut d = dispatcher(registry, config);
        d.store.enqueue(item(vec![Platform::Twitter])).unwrap();
        d.store.enqueue(item(vec![Platform::Twitter])).unwrap();

        d.dispatch_due();
        assert_eq!(d.in_flight.len(), 1);

        // The second item stays scheduled until the pool frees up.
        let statuses: Vec<ItemStatus> = d
            .store
            .items(&QueueFilter::default())
            .iter()
            .map(|i| i.status)
            .collect();
        assert!(statuses.contains(&ItemStatus::Processing));
        assert!(statuses.contains(&ItemStatus::Scheduled));
    }

    #[tokio::test]
    async fn rate_window_defers_excess_dispatches() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(
            MockPublisher::new(Platform::Email).with_delay(Duration::from_secs(60)),
        ));
        let config = EngineConfig {
            rate_limit_per_window: 2,
            platform_concurrency: 16,
            ..EngineConfig::default()
        };
        let mut d = dispatcher(registry, config);
        for _ in 0..5 {
            d.store.enqueue(item(vec![Platform::Email])).unwrap();
        }

        d.dispatch_due();
        assert_eq!(d.in_flight.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_dispatch_is_suppressed_while_in_flight() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(
            MockPublisher::new(Platform::Blog).with_delay(Duration::from_secs(60)),
        ));
        let mut d = dispatcher(registry, EngineConfig::default());
        d.store.enqueue(item(vec![Platform::Blog])).unwrap();

        d.dispatch_due();
        d.dispatch_due();
        assert_eq!(d.in_flight.len(), 1);
    }
}
