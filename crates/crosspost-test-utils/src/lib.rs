// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for the Crosspost publishing engine.
//!
//! Provides [`MockPublisher`], a scriptable `PublisherAdapter` with
//! captured payloads for assertion in integration tests.

pub mod mock_publisher;

pub use mock_publisher::{MockPublisher, PublishScript};
