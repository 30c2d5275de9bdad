// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across the queue store, engine, and adapter traits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Unique identifier for a publishing item, assigned at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The closed set of publishing targets.
///
/// Keeping this an enumeration (rather than free-form strings) means an
/// unknown platform is a configuration error at enqueue time instead of
/// a silent no-op during dispatch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    LinkedIn,
    Twitter,
    Facebook,
    Instagram,
    Email,
    Blog,
}

/// Dispatch priority. Variants are declared most-urgent first so the
/// derived ordering sorts urgent items ahead of low ones.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Lifecycle state of a publishing item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Newly created, not yet placed in the due index.
    Pending,
    /// Waiting in the due index for its scheduled time.
    Scheduled,
    /// At least one platform attempt is in flight.
    Processing,
    /// A platform attempt failed and is waiting out its backoff delay.
    Retrying,
    /// Terminal: every platform succeeded.
    Published,
    /// Terminal: at least one platform exhausted its retries.
    Failed,
    /// Terminal: cancelled manually or by an emergency stop.
    Cancelled,
}

impl ItemStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is an edge of the item state machine.
    pub fn can_transition_to(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, to),
            (Pending, Scheduled)
                | (Pending, Cancelled)
                | (Scheduled, Processing)
                | (Scheduled, Cancelled)
                | (Processing, Published)
                | (Processing, Retrying)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Retrying, Processing)
                | (Retrying, Cancelled)
        )
    }
}

/// Resolution state of a single platform within an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlatformOutcome {
    /// No confirmed result yet (never attempted, or awaiting retry).
    Pending,
    /// The platform accepted the post.
    Succeeded,
    /// Retries exhausted or a permanent failure occurred.
    Failed,
    /// The attempt was cancelled before the platform confirmed anything.
    Cancelled,
}

impl PlatformOutcome {
    /// A resolved platform needs no further dispatch.
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Per-platform attempt tracking, grown monotonically as attempts are made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformResult {
    /// Failures that consumed a retry. Never exceeds the item's
    /// `max_retries`; a failure at the ceiling resolves the platform
    /// without incrementing.
    pub retry_count: u32,
    pub outcome: PlatformOutcome,
    /// Platform-assigned post id, when the platform reports one.
    pub post_id: Option<String>,
    pub failed_reason: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Earliest time the next attempt may be dispatched (set while the
    /// platform is waiting out a backoff delay).
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Default for PlatformResult {
    fn default() -> Self {
        Self {
            retry_count: 0,
            outcome: PlatformOutcome::Pending,
            post_id: None,
            failed_reason: None,
            published_at: None,
            next_attempt_at: None,
        }
    }
}

/// The rendered content handed to publisher adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub content_id: String,
    pub title: String,
    pub body: String,
}

/// Confirmation returned by a successful publish attempt.
#[derive(Debug, Clone, Default)]
pub struct PublishReceipt {
    /// Platform-assigned id of the created post, if the platform
    /// reports one.
    pub post_id: Option<String>,
}

/// Specification of a new queue item, validated at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub content_id: String,
    pub title: String,
    pub body: String,
    /// Must be non-empty; each platform is tracked independently.
    pub platforms: Vec<Platform>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    /// Per-platform ceiling on retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Free-form attributes (hashtags, mentions, media references),
    /// passed through to adapters unchanged.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_max_retries() -> u32 {
    3
}

impl NewItem {
    /// Create a spec with default priority, retry ceiling, and empty metadata.
    pub fn new(
        content_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        platforms: Vec<Platform>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            title: title.into(),
            body: body.into(),
            platforms,
            scheduled_at,
            priority: Priority::default(),
            max_retries: default_max_retries(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A unit of publishing work tracked by the queue store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingItem {
    pub id: ItemId,
    pub content_id: String,
    pub title: String,
    pub body: String,
    pub platforms: Vec<Platform>,
    /// Mutable only by explicit reschedule.
    pub scheduled_at: DateTime<Utc>,
    pub priority: Priority,
    pub max_retries: u32,
    pub status: ItemStatus,
    pub metadata: serde_json::Value,
    pub results: HashMap<Platform, PlatformResult>,
    /// Monotonic enqueue sequence, the FIFO tie-break for equal
    /// priority and scheduled time.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    /// Set on the first dispatch; start of the processing-time clock.
    pub dispatched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PublishingItem {
    /// The rendered payload handed to every adapter for this item.
    pub fn payload(&self) -> ContentPayload {
        ContentPayload {
            content_id: self.content_id.clone(),
            title: self.title.clone(),
            body: self.body.clone(),
        }
    }

    /// Platforms with no confirmed result yet.
    pub fn unresolved_platforms(&self) -> Vec<Platform> {
        self.platforms
            .iter()
            .copied()
            .filter(|p| {
                self.results
                    .get(p)
                    .is_none_or(|r| !r.outcome.is_resolved())
            })
            .collect()
    }

    /// Whether every platform has a confirmed result.
    pub fn all_resolved(&self) -> bool {
        self.platforms.iter().all(|p| {
            self.results
                .get(p)
                .is_some_and(|r| r.outcome.is_resolved())
        })
    }
}

/// One status change, broadcast by the queue store to subscribers.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub item_id: ItemId,
    /// `None` for the enqueue event that creates the item.
    pub from: Option<ItemStatus>,
    pub to: ItemStatus,
    pub at: DateTime<Utc>,
    /// Wall-clock milliseconds from first dispatch to terminal
    /// resolution; present only on terminal transitions of items that
    /// were dispatched.
    pub processing_ms: Option<u64>,
}

/// Coarse, threshold-derived summary of queue success/failure ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueHealth {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl QueueHealth {
    /// The next level down, saturating at `Critical`.
    pub fn demoted(self) -> Self {
        match self {
            Self::Excellent => Self::Good,
            Self::Good => Self::Warning,
            Self::Warning | Self::Critical => Self::Critical,
        }
    }
}

/// Running queue counters, maintained incrementally from transitions.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatistics {
    pub total_posts: u64,
    pub published_today: u64,
    pub pending_posts: u64,
    pub scheduled_posts: u64,
    pub processing_posts: u64,
    pub retrying_posts: u64,
    pub published_posts: u64,
    pub failed_posts: u64,
    pub cancelled_posts: u64,
    /// All-time published / (published + failed). Cancelled items are
    /// excluded. 1.0 when nothing has resolved yet.
    pub success_rate: f64,
    /// Incremental mean of dispatch-to-terminal wall-clock time.
    pub average_processing_ms: f64,
    pub queue_health: QueueHealth,
}

impl Default for QueueStatistics {
    fn default() -> Self {
        Self {
            total_posts: 0,
            published_today: 0,
            pending_posts: 0,
            scheduled_posts: 0,
            processing_posts: 0,
            retrying_posts: 0,
            published_posts: 0,
            failed_posts: 0,
            cancelled_posts: 0,
            success_rate: 1.0,
            average_processing_ms: 0.0,
            queue_health: QueueHealth::Excellent,
        }
    }
}

/// Filter for queue item listings. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub status: Option<ItemStatus>,
    pub platform: Option<Platform>,
    pub priority: Option<Priority>,
}

impl QueueFilter {
    pub fn matches(&self, item: &PublishingItem) -> bool {
        self.status.is_none_or(|s| item.status == s)
            && self
                .platform
                .is_none_or(|p| item.platforms.contains(&p))
            && self.priority.is_none_or(|p| item.priority == p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn urgent_sorts_before_low() {
        let mut priorities = vec![Priority::Low, Priority::Urgent, Priority::Medium, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Urgent, Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn item_id_serializes_as_uuid_string() {
        let id = ItemId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn platform_parses_lowercase_names() {
        assert_eq!(Platform::from_str("linkedin").unwrap(), Platform::LinkedIn);
        assert_eq!(Platform::from_str("twitter").unwrap(), Platform::Twitter);
        assert!(Platform::from_str("myspace").is_err());
    }

    #[test]
    fn platform_display_round_trips() {
        for platform in Platform::iter() {
            let parsed = Platform::from_str(&platform.to_string()).unwrap();
            assert_eq!(parsed, platform);
        }
    }

    #[test]
    fn terminal_states_admit_no_edges() {
        use ItemStatus::*;
        for terminal in [Published, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for to in [Pending, Scheduled, Processing, Retrying, Published, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn retrying_returns_to_processing_only() {
        use ItemStatus::*;
        assert!(Retrying.can_transition_to(Processing));
        assert!(Retrying.can_transition_to(Cancelled));
        assert!(!Retrying.can_transition_to(Published));
        assert!(!Retrying.can_transition_to(Failed));
        assert!(!Retrying.can_transition_to(Scheduled));
    }

    #[test]
    fn published_requires_processing_first() {
        use ItemStatus::*;
        assert!(!Scheduled.can_transition_to(Published));
        assert!(!Pending.can_transition_to(Published));
        assert!(Processing.can_transition_to(Published));
    }

    #[test]
    fn unresolved_platforms_reflect_results() {
        let spec = NewItem::new(
            "c-1",
            "title",
            "body",
            vec![Platform::LinkedIn, Platform::Twitter],
            Utc::now(),
        );
        let mut item = PublishingItem {
            id: ItemId::new(),
            content_id: spec.content_id,
            title: spec.title,
            body: spec.body,
            platforms: spec.platforms,
            scheduled_at: spec.scheduled_at,
            priority: spec.priority,
            max_retries: spec.max_retries,
            status: ItemStatus::Processing,
            metadata: spec.metadata,
            results: HashMap::new(),
            seq: 0,
            created_at: Utc::now(),
            dispatched_at: None,
            finished_at: None,
        };
        assert_eq!(item.unresolved_platforms().len(), 2);

        item.results.insert(
            Platform::LinkedIn,
            PlatformResult {
                outcome: PlatformOutcome::Succeeded,
                ..PlatformResult::default()
            },
        );
        assert_eq!(item.unresolved_platforms(), vec![Platform::Twitter]);
        assert!(!item.all_resolved());

        item.results.insert(
            Platform::Twitter,
            PlatformResult {
                outcome: PlatformOutcome::Failed,
                ..PlatformResult::default()
            },
        );
        assert!(item.all_resolved());
    }

    #[test]
    fn filter_matches_status_platform_priority() {
        let spec = NewItem::new("c-2", "t", "b", vec![Platform::Email], Utc::now())
            .with_priority(Priority::High);
        let item = PublishingItem {
            id: ItemId::new(),
            content_id: spec.content_id,
            title: spec.title,
            body: spec.body,
            platforms: spec.platforms,
            scheduled_at: spec.scheduled_at,
            priority: spec.priority,
            max_retries: spec.max_retries,
            status: ItemStatus::Scheduled,
            metadata: spec.metadata,
            results: HashMap::new(),
            seq: 1,
            created_at: Utc::now(),
            dispatched_at: None,
            finished_at: None,
        };

        assert!(QueueFilter::default().matches(&item));
        assert!(QueueFilter {
            status: Some(ItemStatus::Scheduled),
            platform: Some(Platform::Email),
            priority: Some(Priority::High),
        }
        .matches(&item));
        assert!(!QueueFilter {
            platform: Some(Platform::Blog),
            ..QueueFilter::default()
        }
        .matches(&item));
    }

    #[test]
    fn health_demotion_saturates() {
        assert_eq!(QueueHealth::Excellent.demoted(), QueueHealth::Good);
        assert_eq!(QueueHealth::Warning.demoted(), QueueHealth::Critical);
        assert_eq!(QueueHealth::Critical.demoted(), QueueHealth::Critical);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn any_status() -> impl Strategy<Value = ItemStatus> {
            use ItemStatus::*;
            proptest::sample::select(vec![
                Pending, Scheduled, Processing, Retrying, Published, Failed, Cancelled,
            ])
        }

        proptest! {
            #[test]
            fn no_edge_leaves_a_terminal_state(from in any_status(), to in any_status()) {
                if from.is_terminal() {
                    prop_assert!(!from.can_transition_to(to));
                }
            }

            #[test]
            fn no_self_transitions(status in any_status()) {
                prop_assert!(!status.can_transition_to(status));
            }

            #[test]
            fn only_processing_reaches_published_or_failed(from in any_status()) {
                for terminal in [ItemStatus::Published, ItemStatus::Failed] {
                    if from.can_transition_to(terminal) {
                        prop_assert_eq!(from, ItemStatus::Processing);
                    }
                }
            }
        }
    }
}
