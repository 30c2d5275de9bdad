// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of publisher adapters, keyed by platform.
//!
//! Enqueue-time validation checks this registry so that an item
//! targeting a platform with no adapter is rejected up front instead of
//! failing silently during dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crosspost_core::types::Platform;
use crosspost_core::PublisherAdapter;

/// Registry of publisher adapters.
///
/// Built once at engine construction and shared read-only with the
/// scheduler. One adapter per platform; re-registering a platform
/// replaces its adapter.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PublisherAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry with no adapters.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter under its own platform.
    pub fn register(&mut self, adapter: Arc<dyn PublisherAdapter>) {
        let platform = adapter.platform();
        info!(platform = %platform, adapter = adapter.name(), "registering publisher adapter");
        self.adapters.insert(platform, adapter);
    }

    /// The adapter for a platform, if one is registered.
    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PublisherAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.adapters.contains_key(&platform)
    }

    /// Registered platforms, sorted for deterministic output.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
