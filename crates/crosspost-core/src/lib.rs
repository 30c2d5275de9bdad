// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core types and traits for the Crosspost publishing queue engine.
//!
//! This crate defines the shared vocabulary of the engine: the closed
//! [`Platform`](types::Platform) enumeration, the publishing item data
//! model and its status state machine, the error taxonomy, and the
//! [`PublisherAdapter`](traits::publisher::PublisherAdapter) trait that
//! per-platform delivery clients implement.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{CrosspostError, PublishError};
pub use traits::publisher::PublisherAdapter;
