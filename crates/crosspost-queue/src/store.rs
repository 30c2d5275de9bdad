// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The queue store: ordered collection of publishing items plus their
//! lifecycle state.
//!
//! All reads and writes of a single item happen under one lock, so no
//! caller ever observes a partial status update. The scheduler is the
//! only component that drives status transitions during normal
//! operation; everything else consumes the broadcast stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crosspost_core::types::{
    ItemId, ItemStatus, NewItem, Platform, PlatformOutcome, PlatformResult, PublishReceipt,
    PublishingItem, QueueFilter, TransitionEvent,
};
use crosspost_core::CrosspostError;

/// Default capacity of the transition broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Inner {
    items: HashMap<ItemId, PublishingItem>,
    /// Due index: `(earliest dispatchable time, enqueue seq) -> item`.
    /// Entries live here from enqueue until the item reaches a terminal
    /// state; retries re-key the entry to their backoff deadline.
    due: BTreeMap<(DateTime<Utc>, u64), ItemId>,
    /// Current due-index key per item, so removal never scans the index.
    due_keys: HashMap<ItemId, (DateTime<Utc>, u64)>,
    next_seq: u64,
}

impl Inner {
    fn insert_due(&mut self, id: ItemId, at: DateTime<Utc>, seq: u64) {
        self.due.insert((at, seq), id);
        self.due_keys.insert(id, (at, seq));
    }

    fn remove_due(&mut self, id: ItemId) {
        if let Some(key) = self.due_keys.remove(&id) {
            self.due.remove(&key);
        }
    }
}

/// In-memory queue store with an indexed due set and push-style
/// transition notifications.
pub struct QueueStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<TransitionEvent>,
}

impl QueueStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                due: BTreeMap::new(),
                due_keys: HashMap::new(),
                next_seq: 0,
            }),
            events,
        }
    }

    /// Subscribe to status transitions. Every status change of every
    /// item is delivered, in transition order.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    /// Validate and insert a new item. Returns its assigned id.
    ///
    /// The item enters the due index immediately (its scheduled time is
    /// required), so both the creation and the `pending -> scheduled`
    /// transitions are emitted before this returns.
    pub fn enqueue(&self, spec: NewItem) -> Result<ItemId, CrosspostError> {
        if spec.platforms.is_empty() {
            return Err(CrosspostError::Config(
                "publishing item must target at least one platform".into(),
            ));
        }
        let mut deduped = spec.platforms.clone();
        deduped.sort();
        deduped.dedup();
        if deduped.len() != spec.platforms.len() {
            return Err(CrosspostError::Config(
                "publishing item lists a platform more than once".into(),
            ));
        }

        let now = Utc::now();
        let id = ItemId::new();
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let results = spec
            .platforms
            .iter()
            .map(|p| (*p, PlatformResult::default()))
            .collect();
        let mut item = PublishingItem {
            id,
            content_id: spec.content_id,
            title: spec.title,
            body: spec.body,
            platforms: spec.platforms,
            scheduled_at: spec.scheduled_at,
            priority: spec.priority,
            max_retries: spec.max_retries,
            status: ItemStatus::Pending,
            metadata: spec.metadata,
            results,
            seq,
            created_at: now,
            dispatched_at: None,
            finished_at: None,
        };
        let scheduled_at = item.scheduled_at;
        self.emit(id, None, ItemStatus::Pending, now, None);

        item.status = ItemStatus::Scheduled;
        inner.items.insert(id, item);
        inner.insert_due(id, scheduled_at, seq);
        self.emit(id, Some(ItemStatus::Pending), ItemStatus::Scheduled, now, None);

        info!(item_id = %id, scheduled_at = %scheduled_at, "item enqueued");
        Ok(id)
    }

    pub fn get(&self, id: ItemId) -> Option<PublishingItem> {
        self.inner.lock().unwrap().items.get(&id).cloned()
    }

    /// All items matching the filter, in enqueue order.
    pub fn items(&self, filter: &QueueFilter) -> Vec<PublishingItem> {
        let inner = self.inner.lock().unwrap();
        let mut matched: Vec<PublishingItem> = inner
            .items
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        matched.sort_by_key(|item| item.seq);
        matched
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items whose due time has arrived, ordered by
    /// `(priority, scheduled_at, enqueue seq)`.
    ///
    /// Only the due prefix of the index is visited, never the whole
    /// queue. Items already in flight for all their platforms are still
    /// returned; the scheduler skips outstanding (item, platform) pairs
    /// itself.
    pub fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<PublishingItem> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<PublishingItem> = inner
            .due
            .range(..=(now, u64::MAX))
            .filter_map(|(_, id)| inner.items.get(id))
            .filter(|item| !item.status.is_terminal())
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.seq.cmp(&b.seq))
        });
        due.truncate(limit);
        due
    }

    /// Move an item into `processing` ahead of its first platform
    /// dispatch of this round. Idempotent while already processing.
    pub fn begin_processing(&self, id: ItemId, now: DateTime<Utc>) -> Result<(), CrosspostError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(CrosspostError::ItemNotFound { id })?;
        if item.status == ItemStatus::Processing {
            return Ok(());
        }
        let from = item.status;
        if !from.can_transition_to(ItemStatus::Processing) {
            return Err(CrosspostError::InvalidTransition {
                id,
                from,
                to: ItemStatus::Processing,
            });
        }
        item.status = ItemStatus::Processing;
        if item.dispatched_at.is_none() {
            item.dispatched_at = Some(now);
        }
        self.emit(id, Some(from), ItemStatus::Processing, now, None);
        Ok(())
    }

    /// Record a confirmed platform success.
    pub fn record_success(
        &self,
        id: ItemId,
        platform: Platform,
        receipt: PublishReceipt,
        now: DateTime<Utc>,
    ) -> Result<(), CrosspostError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(CrosspostError::ItemNotFound { id })?;
        let result = item.results.entry(platform).or_default();
        result.outcome = PlatformOutcome::Succeeded;
        result.post_id = receipt.post_id;
        result.published_at = Some(now);
        result.next_attempt_at = None;
        debug!(item_id = %id, platform = %platform, "platform publish confirmed");
        Ok(())
    }

    /// Record a retryable platform failure: bump the retry counter, set
    /// the backoff deadline, and move the item to `retrying`.
    ///
    /// The caller (retry controller) has already checked that the
    /// failure is transient and the retry ceiling is not reached. A
    /// late failure for an item that was cancelled or resolved while
    /// the attempt was in flight is dropped; the terminal state and the
    /// due index stay untouched.
    pub fn record_retry(
        &self,
        id: ItemId,
        platform: Platform,
        reason: String,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), CrosspostError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(CrosspostError::ItemNotFound { id })?;
        if item.status.is_terminal() {
            debug!(item_id = %id, platform = %platform, "late failure for terminal item dropped");
            return Ok(());
        }
        let result = item.results.entry(platform).or_default();
        if result.outcome.is_resolved() {
            debug!(item_id = %id, platform = %platform, "late failure for resolved platform dropped");
            return Ok(());
        }
        result.retry_count += 1;
        result.failed_reason = Some(reason);
        result.next_attempt_at = Some(next_attempt_at);

        let from = item.status;
        if from == ItemStatus::Processing {
            item.status = ItemStatus::Retrying;
            self.emit(id, Some(from), ItemStatus::Retrying, now, None);
        }
        Self::rekey_due(&mut inner, id);
        debug!(
            item_id = %id,
            platform = %platform,
            next_attempt_at = %next_attempt_at,
            "platform attempt failed, retry scheduled"
        );
        Ok(())
    }

    /// Resolve a platform as permanently failed. A platform that
    /// already has a confirmed result keeps it.
    pub fn mark_platform_failed(
        &self,
        id: ItemId,
        platform: Platform,
        reason: String,
    ) -> Result<(), CrosspostError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(CrosspostError::ItemNotFound { id })?;
        let result = item.results.entry(platform).or_default();
        if result.outcome.is_resolved() {
            return Ok(());
        }
        result.outcome = PlatformOutcome::Failed;
        result.failed_reason = Some(reason);
        result.next_attempt_at = None;
        debug!(item_id = %id, platform = %platform, "platform permanently failed");
        Ok(())
    }

    /// Resolve a platform as cancelled, unless it already confirmed a
    /// success (a confirmed post cannot be un-sent).
    pub fn mark_platform_cancelled(
        &self,
        id: ItemId,
        platform: Platform,
    ) -> Result<(), CrosspostError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(CrosspostError::ItemNotFound { id })?;
        let result = item.results.entry(platform).or_default();
        if result.outcome != PlatformOutcome::Succeeded {
            result.outcome = PlatformOutcome::Cancelled;
            result.next_attempt_at = None;
        }
        Ok(())
    }

    /// If every platform is resolved, move the item to its terminal
    /// state and return it. All-or-nothing policy: `published` only if
    /// every platform succeeded; a cancelled platform outranks failure.
    pub fn finalize_if_resolved(
        &self,
        id: ItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<ItemStatus>, CrosspostError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(CrosspostError::ItemNotFound { id })?;
        if item.status.is_terminal() || !item.all_resolved() {
            return Ok(None);
        }

        let outcomes: Vec<PlatformOutcome> = item
            .platforms
            .iter()
            .filter_map(|p| item.results.get(p).map(|r| r.outcome))
            .collect();
        let terminal = if outcomes.iter().all(|o| *o == PlatformOutcome::Succeeded) {
            ItemStatus::Published
        } else if outcomes.iter().any(|o| *o == PlatformOutcome::Cancelled) {
            ItemStatus::Cancelled
        } else {
            ItemStatus::Failed
        };

        let from = item.status;
        if !from.can_transition_to(terminal) {
            return Err(CrosspostError::InvalidTransition {
                id,
                from,
                to: terminal,
            });
        }
        item.status = terminal;
        item.finished_at = Some(now);
        let processing_ms = item
            .dispatched_at
            .map(|t| (now - t).num_milliseconds().max(0) as u64);
        inner.remove_due(id);
        self.emit(id, Some(from), terminal, now, processing_ms);
        info!(item_id = %id, status = %terminal, "item resolved");
        Ok(Some(terminal))
    }

    /// Cancel a non-terminal item. Unresolved platforms are marked
    /// cancelled; confirmed successes are preserved in the results.
    pub fn cancel(&self, id: ItemId, now: DateTime<Utc>) -> Result<(), CrosspostError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(CrosspostError::ItemNotFound { id })?;
        let from = item.status;
        if !from.can_transition_to(ItemStatus::Cancelled) {
            return Err(CrosspostError::InvalidTransition {
                id,
                from,
                to: ItemStatus::Cancelled,
            });
        }
        for result in item.results.values_mut() {
            if !result.outcome.is_resolved() {
                result.outcome = PlatformOutcome::Cancelled;
                result.next_attempt_at = None;
            }
        }
        item.status = ItemStatus::Cancelled;
        item.finished_at = Some(now);
        let processing_ms = item
            .dispatched_at
            .map(|t| (now - t).num_milliseconds().max(0) as u64);
        inner.remove_due(id);
        self.emit(id, Some(from), ItemStatus::Cancelled, now, processing_ms);
        info!(item_id = %id, "item cancelled");
        Ok(())
    }

    /// Move a waiting item to a new scheduled time.
    pub fn reschedule(
        &self,
        id: ItemId,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), CrosspostError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(CrosspostError::ItemNotFound { id })?;
        if item.status != ItemStatus::Scheduled {
            return Err(CrosspostError::InvalidTransition {
                id,
                from: item.status,
                to: ItemStatus::Scheduled,
            });
        }
        item.scheduled_at = scheduled_at;
        Self::rekey_due(&mut inner, id);
        info!(item_id = %id, scheduled_at = %scheduled_at, "item rescheduled");
        Ok(())
    }

    /// Re-key an item's due entry to the earliest time any of its
    /// unresolved platforms may be dispatched.
    fn rekey_due(inner: &mut Inner, id: ItemId) {
        let Some(item) = inner.items.get(&id) else {
            return;
        };
        // Terminal items have left the due index and must not re-enter.
        if item.status.is_terminal() {
            return;
        }
        let seq = item.seq;
        let due_at = item
            .platforms
            .iter()
            .filter(|p| {
                item.results
                    .get(p)
                    .is_none_or(|r| !r.outcome.is_resolved())
            })
            .map(|p| {
                item.results
                    .get(p)
                    .and_then(|r| r.next_attempt_at)
                    .unwrap_or(item.scheduled_at)
            })
            .min()
            .unwrap_or(item.scheduled_at);
        inner.remove_due(id);
        inner.insert_due(id, due_at, seq);
    }

    fn emit(
        &self,
        item_id: ItemId,
        from: Option<ItemStatus>,
        to: ItemStatus,
        at: DateTime<Utc>,
        processing_ms: Option<u64>,
    ) {
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.events.send(TransitionEvent {
            item_id,
            from,
            to,
            at,
            processing_ms,
        });
    }
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}
