// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Crosspost publishing engine.
//!
//! Wires the queue store, a single-coordinator scheduler loop, the
//! retry controller, and the statistics aggregator behind the
//! [`PublishingEngine`] facade. Content items are fanned out to
//! registered [`PublisherAdapter`](crosspost_core::PublisherAdapter)s
//! on schedule, bounded by per-platform worker pools and rate limits,
//! with exponential-backoff retries and live queue statistics.

pub mod config;
mod dispatcher;
pub mod engine;
pub mod limiter;
pub mod registry;
pub mod retry;
pub mod stats;

pub use config::EngineConfig;
pub use engine::{EngineHealth, PublishingEngine};
pub use registry::AdapterRegistry;
