// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The publishing engine: the public facade over the queue store,
//! adapter registry, scheduler loop, and statistics aggregator.
//!
//! Constructing an engine wires the statistics aggregator to the
//! store's transition stream immediately; the scheduler loop only runs
//! between `start_processing` and one of the stop calls. Items may be
//! enqueued, inspected, cancelled, and rescheduled whether or not the
//! loop is running.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crosspost_core::types::{
    ItemId, NewItem, Platform, PublishingItem, QueueFilter, QueueStatistics, TransitionEvent,
};
use crosspost_core::CrosspostError;
use crosspost_queue::QueueStore;

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::registry::AdapterRegistry;
use crate::stats::{self, StatisticsHandle};

/// Point-in-time operational summary of the engine.
#[derive(Debug, Clone)]
pub struct EngineHealth {
    pub running: bool,
    pub registered_platforms: Vec<Platform>,
    pub queue_depth: usize,
    pub statistics: QueueStatistics,
}

/// One running scheduler loop and its control tokens.
struct RunHandle {
    stop: CancellationToken,
    kill: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for RunHandle {
    /// An engine dropped while running must not leave the loop
    /// dispatching against an unowned store.
    fn drop(&mut self) {
        self.kill.cancel();
        self.task.abort();
    }
}

/// The publishing queue engine.
pub struct PublishingEngine {
    store: Arc<QueueStore>,
    registry: Arc<AdapterRegistry>,
    config: EngineConfig,
    stats: StatisticsHandle,
    run: Mutex<Option<RunHandle>>,
}

impl PublishingEngine {
    /// Build an engine over a validated configuration and a registry of
    /// adapters. The statistics aggregator starts immediately.
    pub fn new(registry: AdapterRegistry, config: EngineConfig) -> Result<Self, CrosspostError> {
        config.validate()?;
        let store = Arc::new(QueueStore::new());
        let stats = stats::spawn(store.subscribe(), config.health.clone());
        Ok(Self {
            store,
            registry: Arc::new(registry),
            config,
            stats,
            run: Mutex::new(None),
        })
    }

    /// Validate and enqueue a new publishing item.
    ///
    /// Every target platform must have a registered adapter; an unknown
    /// platform is rejected here rather than failing during dispatch.
    pub fn add_to_queue(&self, spec: NewItem) -> Result<ItemId, CrosspostError> {
        for platform in &spec.platforms {
            if !self.registry.contains(*platform) {
                return Err(CrosspostError::AdapterNotFound {
                    platform: *platform,
                });
            }
        }
        self.store.enqueue(spec)
    }

    /// Start the scheduler loop. Idempotent while a loop is running.
    pub fn start_processing(&self) {
        let mut run = self.run.lock().unwrap();
        if run.as_ref().is_some_and(|handle| !handle.task.is_finished()) {
            return;
        }
        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.clone(),
            stop.clone(),
            kill.clone(),
        );
        let task = tokio::spawn(dispatcher.run());
        *run = Some(RunHandle { stop, kill, task });
        info!("engine started");
    }

    /// Stop gracefully: no new dispatches, in-flight attempts drain to
    /// completion (bounded by the configured drain timeout). No-op when
    /// not running.
    pub async fn stop_processing(&self) {
        let Some(mut handle) = self.take_run() else {
            return;
        };
        handle.stop.cancel();
        Self::join(&mut handle.task).await;
        info!("engine stopped");
    }

    /// Stop immediately: in-flight attempts are cancelled and no item
    /// is left in `processing`. Scheduled and retrying items stay in
    /// the queue for a later restart.
    pub async fn emergency_stop(&self) {
        let Some(mut handle) = self.take_run() else {
            return;
        };
        handle.kill.cancel();
        Self::join(&mut handle.task).await;
        warn!("engine emergency-stopped");
    }

    fn take_run(&self) -> Option<RunHandle> {
        self.run.lock().unwrap().take()
    }

    async fn join(task: &mut JoinHandle<()>) {
        if let Err(error) = task.await {
            warn!(%error, "scheduler task ended abnormally");
        }
    }

    /// Whether a scheduler loop is currently running.
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// The latest statistics snapshot (push-maintained, O(1) to read).
    pub fn get_statistics(&self) -> QueueStatistics {
        self.stats.snapshot()
    }

    /// Items matching the filter, in enqueue order.
    pub fn get_queue_items(&self, filter: &QueueFilter) -> Vec<PublishingItem> {
        self.store.items(filter)
    }

    pub fn get_item(&self, id: ItemId) -> Result<PublishingItem, CrosspostError> {
        self.store
            .get(id)
            .ok_or(CrosspostError::ItemNotFound { id })
    }

    /// Cancel a non-terminal item. Platforms that already confirmed a
    /// publish keep their results.
    pub fn cancel_item(&self, id: ItemId) -> Result<(), CrosspostError> {
        self.store.cancel(id, Utc::now())
    }

    /// Move a still-waiting item to a new scheduled time.
    pub fn reschedule_item(
        &self,
        id: ItemId,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), CrosspostError> {
        self.store.reschedule(id, scheduled_at)
    }

    /// Subscribe to every item status transition.
    pub fn on_transition(&self) -> broadcast::Receiver<TransitionEvent> {
        self.store.subscribe()
    }

    pub fn queue_len(&self) -> usize {
        self.store.len()
    }

    /// Operational summary for dashboards and health endpoints.
    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            running: self.is_running(),
            registered_platforms: self.registry.platforms(),
            queue_depth: self.store.len(),
            statistics: self.stats.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosspost_test_utils::MockPublisher;

    fn engine_with(platforms: &[Platform]) -> PublishingEngine {
        let mut registry = AdapterRegistry::new();
        for platform in platforms {
            registry.register(Arc::new(MockPublisher::new(*platform)));
        }
        PublishingEngine::new(registry, EngineConfig::default()).unwrap()
    }

    fn spec(platforms: Vec<Platform>) -> NewItem {
        NewItem::new("c-1", "title", "body", platforms, Utc::now())
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = EngineConfig {
            tick_interval_ms: 0,
            ..EngineConfig::default()
        };
        let result = PublishingEngine::new(AdapterRegistry::new(), config);
        assert!(matches!(result, Err(CrosspostError::Config(_))));
    }

    #[tokio::test]
    async fn enqueue_rejects_unregistered_platform() {
        let engine = engine_with(&[Platform::Twitter]);
        let err = engine
            .add_to_queue(spec(vec![Platform::Twitter, Platform::Blog]))
            .unwrap_err();
        assert!(matches!(
            err,
            CrosspostError::AdapterNotFound {
                platform: Platform::Blog
            }
        ));
        assert_eq!(engine.queue_len(), 0);
    }

    #[tokio::test]
    async fn enqueue_works_while_stopped() {
        let engine = engine_with(&[Platform::Email]);
        assert!(!engine.is_running());
        let id = engine.add_to_queue(spec(vec![Platform::Email])).unwrap();
        assert_eq!(engine.get_item(id).unwrap().id, id);
        assert_eq!(engine.queue_len(), 1);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_without_start_is_noop() {
        let engine = engine_with(&[Platform::Email]);
        engine.stop_processing().await;

        engine.start_processing();
        engine.start_processing();
        assert!(engine.is_running());

        engine.stop_processing().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn dropping_running_engine_halts_scheduler() {
        let mock = Arc::new(MockPublisher::new(Platform::Twitter));
        let mut registry = AdapterRegistry::new();
        registry.register(mock.clone());
        let config = EngineConfig {
            tick_interval_ms: 10,
            ..EngineConfig::default()
        };
        let engine = PublishingEngine::new(registry, config).unwrap();

        engine
            .add_to_queue(NewItem::new(
                "c-1",
                "title",
                "body",
                vec![Platform::Twitter],
                Utc::now() + chrono::Duration::milliseconds(200),
            ))
            .unwrap();
        engine.start_processing();
        drop(engine);

        // The loop died with the engine; the item never dispatches.
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(mock.calls().await, 0);
    }

    #[tokio::test]
    async fn health_reports_registry_and_depth() {
        let engine = engine_with(&[Platform::LinkedIn, Platform::Email]);
        engine
            .add_to_queue(spec(vec![Platform::LinkedIn]))
            .unwrap();

        let health = engine.health();
        assert!(!health.running);
        assert_eq!(
            health.registered_platforms,
            vec![Platform::LinkedIn, Platform::Email]
        );
        assert_eq!(health.queue_depth, 1);
    }

    #[tokio::test]
    async fn unknown_item_lookup_fails() {
        let engine = engine_with(&[Platform::Blog]);
        let err = engine.get_item(ItemId::new()).unwrap_err();
        assert!(matches!(err, CrosspostError::ItemNotFound { .. }));
    }
}
