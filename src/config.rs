// src/config.rs

//! Loads and resolves the router's own ambient tunables: reconnect backoff,
//! buffering defaults, and the rate-limiter interval for noisy warnings.
//!
//! This is deliberately narrow. Higher-level configuration — which shards
//! exist, which `ConnectionInfo`s belong to them — is the caller's concern
//! and is passed in directly via `set_connection_infos`/`set_master`, not
//! loaded from a file here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::ShardRouterError;
use crate::core::instance::BufferingSettings;

/// Exponential backoff schedule for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconnectBackoff {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReconnectBackoff {
    /// The delay before the `attempt`-th reconnect (0-indexed), clamped to `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max)
    }
}

/// The router's resolved, ready-to-use configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardRouterConfig {
    #[serde(default)]
    pub reconnect: ReconnectBackoff,
    #[serde(default)]
    pub buffering: BufferingSettings,
    /// Minimum gap between repeated "all candidates refused"/"server not
    /// found" warnings for the same shard.
    #[serde(default = "default_warning_interval", with = "humantime_serde")]
    pub warning_interval: Duration,
}

fn default_warning_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for ShardRouterConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectBackoff::default(),
            buffering: BufferingSettings::default(),
            warning_interval: default_warning_interval(),
        }
    }
}

impl ShardRouterConfig {
    /// Loads configuration layered as: built-in defaults, then an optional
    /// `path` file (TOML), then `REDIS_SHARD_ROUTER_*` environment overrides
    /// (e.g. `REDIS_SHARD_ROUTER_RECONNECT__MAX=60s`).
    pub fn load(path: Option<&str>) -> Result<Self, ShardRouterError> {
        let defaults = ShardRouterConfig::default();
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&defaults).map_err(ShardRouterError::from)?,
        );

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("REDIS_SHARD_ROUTER")
                .separator("__")
                .try_parsing(true),
        );

        let resolved: ShardRouterConfig = builder.build()?.try_deserialize()?;
        resolved.validate()?;
        Ok(resolved)
    }

    fn validate(&self) -> Result<(), ShardRouterError> {
        if self.reconnect.initial.is_zero() {
            return Err(ShardRouterError::Config(
                "reconnect.initial must be greater than zero".to_string(),
            ));
        }
        if self.reconnect.max < self.reconnect.initial {
            return Err(ShardRouterError::Config(
                "reconnect.max must be >= reconnect.initial".to_string(),
            ));
        }
        if self.buffering.max_batch_size == 0 {
            return Err(ShardRouterError::Config(
                "buffering.max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = ShardRouterConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let backoff = ReconnectBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn rejects_zero_initial_backoff() {
        let cfg = ShardRouterConfig {
            reconnect: ReconnectBackoff {
                initial: Duration::from_millis(0),
                ..ReconnectBackoff::default()
            },
            ..ShardRouterConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
