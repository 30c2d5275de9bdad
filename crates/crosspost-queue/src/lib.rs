// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory queue store for the Crosspost publishing engine.
//!
//! [`QueueStore`] owns all mutation of item lifecycle state. It keeps a
//! due index keyed by `(due_at, seq)` so the scheduler's per-tick
//! "what is due" query never scans the whole queue, and broadcasts a
//! [`TransitionEvent`](crosspost_core::types::TransitionEvent) for every
//! status change so statistics and dashboards subscribe instead of
//! polling.

pub mod store;

pub use store::QueueStore;
