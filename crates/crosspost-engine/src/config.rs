// SPDX-FileCopyrightText: 2026 Crosspost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine configuration, loaded with Figment from TOML files and
//! `CROSSPOST_` environment variables.
//!
//! All fields default to sensible values; `#[serde(deny_unknown_fields)]`
//! rejects unrecognized keys at load time.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crosspost_core::CrosspostError;

/// Top-level configuration for the publishing engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Scheduler tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum due items considered per tick.
    #[serde(default = "default_dispatch_batch")]
    pub dispatch_batch: usize,

    /// First retry delay in milliseconds; doubled per consumed retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on the retry delay in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Maximum concurrent publish attempts per platform.
    #[serde(default = "default_platform_concurrency")]
    pub platform_concurrency: usize,

    /// Maximum dispatches per platform within one rate-limit window.
    #[serde(default = "default_rate_limit_per_window")]
    pub rate_limit_per_window: u32,

    /// Rate-limit window length in milliseconds.
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,

    /// Capacity of the worker-to-coordinator result channel.
    #[serde(default = "default_result_channel_capacity")]
    pub result_channel_capacity: usize,

    /// How long a graceful stop waits for in-flight attempts before
    /// escalating to cancellation, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Queue health thresholds.
    #[serde(default)]
    pub health: HealthThresholds,
}

/// Success-rate thresholds for the coarse queue health summary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthThresholds {
    /// Success rate at or above this is `excellent`.
    #[serde(default = "default_excellent")]
    pub excellent: f64,

    /// Success rate at or above this is `good`.
    #[serde(default = "default_good")]
    pub good: f64,

    /// Success rate at or above this is `warning`; below is `critical`.
    #[serde(default = "default_warning")]
    pub warning: f64,

    /// When (retrying + failed) / total exceeds this ratio, health is
    /// demoted one level.
    #[serde(default = "default_demote_ratio")]
    pub demote_ratio: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            dispatch_batch: default_dispatch_batch(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            platform_concurrency: default_platform_concurrency(),
            rate_limit_per_window: default_rate_limit_per_window(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            result_channel_capacity: default_result_channel_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
            health: HealthThresholds::default(),
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            excellent: default_excellent(),
            good: default_good(),
            warning: default_warning(),
            demote_ratio: default_demote_ratio(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_dispatch_batch() -> usize {
    64
}

fn default_backoff_base_ms() -> u64 {
    30_000
}

fn default_backoff_cap_ms() -> u64 {
    900_000 // 15 minutes
}

fn default_platform_concurrency() -> usize {
    4
}

fn default_rate_limit_per_window() -> u32 {
    30
}

fn default_rate_limit_window_ms() -> u64 {
    60_000
}

fn default_result_channel_capacity() -> usize {
    256
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_excellent() -> f64 {
    0.95
}

fn default_good() -> f64 {
    0.85
}

fn default_warning() -> f64 {
    0.70
}

fn default_demote_ratio() -> f64 {
    0.25
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), CrosspostError> {
        if self.tick_interval_ms == 0 {
            return Err(CrosspostError::Config("tick_interval_ms must be > 0".into()));
        }
        if self.dispatch_batch == 0 {
            return Err(CrosspostError::Config("dispatch_batch must be > 0".into()));
        }
        if self.platform_concurrency == 0 {
            return Err(CrosspostError::Config(
                "platform_concurrency must be > 0".into(),
            ));
        }
        if self.rate_limit_per_window == 0 || self.rate_limit_window_ms == 0 {
            return Err(CrosspostError::Config(
                "rate limit window and budget must be > 0".into(),
            ));
        }
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_cap_ms {
            return Err(CrosspostError::Config(
                "backoff_base_ms must be > 0 and <= backoff_cap_ms".into(),
            ));
        }
        if self.result_channel_capacity == 0 {
            return Err(CrosspostError::Config(
                "result_channel_capacity must be > 0".into(),
            ));
        }
        let h = &self.health;
        let ordered = h.excellent >= h.good && h.good >= h.warning;
        let in_range = (0.0..=1.0).contains(&h.warning)
            && h.excellent <= 1.0
            && (0.0..=1.0).contains(&h.demote_ratio);
        if !ordered || !in_range {
            return Err(CrosspostError::Config(
                "health thresholds must satisfy 0 <= warning <= good <= excellent <= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Load configuration from `crosspost.toml` in the working directory
/// (if present) with `CROSSPOST_*` environment variable overrides.
pub fn load_config() -> Result<EngineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::file("crosspost.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from an inline TOML string (testing and embedding).
pub fn load_config_from_str(toml_content: &str) -> Result<EngineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file path with env overrides.
pub fn load_config_from_path(path: &Path) -> Result<EngineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(EngineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// `CROSSPOST_HEALTH_GOOD` style overrides, mapping the `health_`
/// prefix to the nested `health.` section.
fn env_provider() -> Env {
    Env::prefixed("CROSSPOST_").map(|key| {
        key.as_str().replacen("health_", "health.", 1).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn defaults_are_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.backoff_base_ms, 30_000);
        assert_eq!(config.backoff_cap_ms, 900_000);
        assert_eq!(config.health.excellent, 0.95);
        assert_eq!(config.health.good, 0.85);
        assert_eq!(config.health.warning, 0.70);
        assert_eq!(config.health.demote_ratio, 0.25);
    }

    #[test]
    fn zero_tick_interval_rejected() {
        let config = EngineConfig {
            tick_interval_ms: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CrosspostError::Config(_))
        ));
    }

    #[test]
    fn backoff_base_above_cap_rejected() {
        let config = EngineConfig {
            backoff_base_ms: 10_000,
            backoff_cap_ms: 1_000,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unordered_health_thresholds_rejected() {
        let config = EngineConfig {
            health: HealthThresholds {
                excellent: 0.5,
                good: 0.9,
                ..HealthThresholds::default()
            },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_overrides_merge_over_defaults() {
        let config = load_config_from_str(
            r#"
            tick_interval_ms = 250
            [health]
            good = 0.80
            "#,
        )
        .unwrap();
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.health.good, 0.80);
        // Untouched fields keep their defaults.
        assert_eq!(config.dispatch_batch, 64);
        assert_eq!(config.health.excellent, 0.95);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(load_config_from_str("tick_speed = 5").is_err());
    }
}
