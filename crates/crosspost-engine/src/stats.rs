// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statistics aggregator: maintains queue counters from the store's
//! transition stream.
//!
//! Every update is O(1) per transition — no queue re-scan. Snapshots
//! are published through a `watch` channel so dashboard readers always
//! see a consistent view. A lagged transition stream is logged and
//! skipped; the dashboard stays available even if counters drift.

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crosspost_core::types::{
    ItemStatus, PublishingItem, QueueHealth, QueueStatistics, TransitionEvent,
};

use crate::config::HealthThresholds;

/// Running counters, updated incrementally from transitions.
struct StatsState {
    thresholds: HealthThresholds,
    total_posts: u64,
    pending: u64,
    scheduled: u64,
    processing: u64,
    retrying: u64,
    published: u64,
    failed: u64,
    cancelled: u64,
    today: NaiveDate,
    published_today: u64,
    avg_processing_ms: f64,
    processing_samples: u64,
}

impl StatsState {
    fn new(thresholds: HealthThresholds, today: NaiveDate) -> Self {
        Self {
            thresholds,
            total_posts: 0,
            pending: 0,
            scheduled: 0,
            processing: 0,
            retrying: 0,
            published: 0,
            failed: 0,
            cancelled: 0,
            today,
            published_today: 0,
            avg_processing_ms: 0.0,
            processing_samples: 0,
        }
    }

    fn bucket(&mut self, status: ItemStatus) -> &mut u64 {
        match status {
            ItemStatus::Pending => &mut self.pending,
            ItemStatus::Scheduled => &mut self.scheduled,
            ItemStatus::Processing => &mut self.processing,
            ItemStatus::Retrying => &mut self.retrying,
            ItemStatus::Published => &mut self.published,
            ItemStatus::Failed => &mut self.failed,
            ItemStatus::Cancelled => &mut self.cancelled,
        }
    }

    fn apply(&mut self, event: &TransitionEvent) {
        match event.from {
            None => self.total_posts += 1,
            Some(from) => {
                let bucket = self.bucket(from);
                // Saturating: a lagged stream must never panic the
                // aggregator, only drift.
                *bucket = bucket.saturating_sub(1);
            }
        }
        *self.bucket(event.to) += 1;

        if event.to == ItemStatus::Published {
            let day = event.at.date_naive();
            if day != self.today {
                self.today = day;
                self.published_today = 0;
            }
            self.published_today += 1;
        }

        if event.to.is_terminal() {
            if let Some(ms) = event.processing_ms {
                self.processing_samples += 1;
                self.avg_processing_ms +=
                    (ms as f64 - self.avg_processing_ms) / self.processing_samples as f64;
            }
        }
    }

    fn snapshot(&self, now: DateTime<Utc>) -> QueueStatistics {
        let success_rate = success_rate(self.published, self.failed);
        QueueStatistics {
            total_posts: self.total_posts,
            published_today: if now.date_naive() == self.today {
                self.published_today
            } else {
                0
            },
            pending_posts: self.pending,
            scheduled_posts: self.scheduled,
            processing_posts: self.processing,
            retrying_posts: self.retrying,
            published_posts: self.published,
            failed_posts: self.failed,
            cancelled_posts: self.cancelled,
            success_rate,
            average_processing_ms: self.avg_processing_ms,
            queue_health: health_for(
                &self.thresholds,
                success_rate,
                self.retrying,
                self.failed,
                self.total_posts,
            ),
        }
    }
}

/// All-time published / (published + failed); 1.0 before anything
/// resolves. Cancelled items never enter the denominator.
pub fn success_rate(published: u64, failed: u64) -> f64 {
    let resolved = published + failed;
    if resolved == 0 {
        1.0
    } else {
        published as f64 / resolved as f64
    }
}

/// Map a success rate and trouble ratio onto the coarse health scale.
pub fn health_for(
    thresholds: &HealthThresholds,
    success_rate: f64,
    retrying: u64,
    failed: u64,
    total: u64,
) -> QueueHealth {
    let level = if success_rate >= thresholds.excellent {
        QueueHealth::Excellent
    } else if success_rate >= thresholds.good {
        QueueHealth::Good
    } else if success_rate >= thresholds.warning {
        QueueHealth::Warning
    } else {
        QueueHealth::Critical
    };
    let troubled = retrying + failed;
    if total > 0 && troubled as f64 / total as f64 > thresholds.demote_ratio {
        level.demoted()
    } else {
        level
    }
}

/// Derive the same statistics from a full item listing.
///
/// Used to cross-check the incrementally maintained counters; the two
/// must agree whenever the transition stream has been fully consumed.
pub fn recompute(items: &[PublishingItem], thresholds: &HealthThresholds) -> QueueStatistics {
    let now = Utc::now();
    let mut counts = [0u64; 7];
    for item in items {
        let idx = match item.status {
            ItemStatus::Pending => 0,
            ItemStatus::Scheduled => 1,
            ItemStatus::Processing => 2,
            ItemStatus::Retrying => 3,
            ItemStatus::Published => 4,
            ItemStatus::Failed => 5,
            ItemStatus::Cancelled => 6,
        };
        counts[idx] += 1;
    }

    let published_today = items
        .iter()
        .filter(|item| {
            item.status == ItemStatus::Published
                && item
                    .finished_at
                    .is_some_and(|t| t.date_naive() == now.date_naive())
        })
        .count() as u64;

    let samples: Vec<u64> = items
        .iter()
        .filter(|item| item.status.is_terminal())
        .filter_map(|item| match (item.dispatched_at, item.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        })
        .collect();
    let average_processing_ms = if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<u64>() as f64 / samples.len() as f64
    };

    let rate = success_rate(counts[4], counts[5]);
    QueueStatistics {
        total_posts: items.len() as u64,
        published_today,
        pending_posts: counts[0],
        scheduled_posts: counts[1],
        processing_posts: counts[2],
        retrying_posts: counts[3],
        published_posts: counts[4],
        failed_posts: counts[5],
        cancelled_posts: counts[6],
        success_rate: rate,
        average_processing_ms,
        queue_health: health_for(thresholds, rate, counts[3], counts[5], items.len() as u64),
    }
}

/// Handle to the spawned aggregator task: a cheap consistent snapshot
/// plus task ownership.
pub struct StatisticsHandle {
    rx: watch::Receiver<QueueStatistics>,
    task: JoinHandle<()>,
}

impl StatisticsHandle {
    /// The latest consistent statistics snapshot.
    pub fn snapshot(&self) -> QueueStatistics {
        self.rx.borrow().clone()
    }
}

impl Drop for StatisticsHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the aggregator over a transition subscription.
///
/// The task runs until the store's broadcast channel closes. Counters
/// update on every event; a lagged receiver logs and continues.
pub fn spawn(
    mut events: broadcast::Receiver<TransitionEvent>,
    thresholds: HealthThresholds,
) -> StatisticsHandle {
    let (tx, rx) = watch::channel(QueueStatistics::default());
    let task = tokio::spawn(async move {
        let mut state = StatsState::new(thresholds, Utc::now().date_naive());
        loop {
            match events.recv().await {
                Ok(event) => {
                    state.apply(&event);
                    let _ = tx.send(state.snapshot(Utc::now()));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transition stream lagged; statistics may drift");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    StatisticsHandle { rx, task }
}
