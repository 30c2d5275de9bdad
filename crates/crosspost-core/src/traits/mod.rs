// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions for external collaborators of the engine.

pub mod publisher;

pub use publisher::PublisherAdapter;
