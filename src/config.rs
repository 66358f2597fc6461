#![allow(dead_code)]
//! Simulation-harness configuration: `unit_capacity`, `max_horizon`, and
//! the ring's `capacity`, loadable from a TOML file plus environment
//! overrides the way `AppConfig` does in the teacher binary this crate was
//! adapted from.
//!
//! `src/storage` never touches this module: the core engine takes its
//! parameters as plain constructor arguments (§6 of the engine
//! specification: "no CLI, no environment variables, no file I/O internal
//! to the core"). `StorageConfig` exists only so a simulation harness can
//! load a whole population of subscriptions' engine parameters from one
//! configuration source.

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::storage::ring_horizon::DEFAULT_CAPACITY;

/// Top-level harness configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub storage: StorageConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

/// Per-engine construction parameters.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_storage_config"))]
pub struct StorageConfig {
    /// Rated per-charger hourly energy, kW (equivalently kWh/timeslot).
    #[validate(range(min = 0.01, max = 1000.0))]
    pub unit_capacity_kw: f64,

    /// Furthest a cohort's departure may be looked ahead, in timeslots.
    #[validate(range(min = 2, max = 96))]
    pub max_horizon: usize,

    /// Ring buffer size; must be at least `max_horizon`.
    #[serde(default = "default_ring_capacity")]
    #[validate(range(min = 2, max = 8192))]
    pub ring_capacity: usize,
}

fn default_ring_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), validator::ValidationError> {
    if config.max_horizon > config.ring_capacity {
        return Err(validator::ValidationError::new(
            "max_horizon must not exceed ring_capacity",
        ));
    }
    Ok(())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            unit_capacity_kw: 6.0,
            max_horizon: 48,
            ring_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Logging configuration, mirroring the teacher's `TelemetryConfig`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `config/default.toml` plus
    /// `STORAGE__`/`TELEMETRY__`-prefixed environment overrides
    /// (`STORAGE__UNIT_CAPACITY_KW=7.5` -> `storage.unit_capacity_kw`).
    ///
    /// Falls back to built-in defaults if no config file is present, since
    /// a toy simulation harness has no installed config directory of its
    /// own.
    pub fn load() -> Result<Self> {
        let figment = Figment::from(figment::providers::Serialized::defaults(AppConfig::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("STORAGE__").split("__"))
            .merge(Env::prefixed("TELEMETRY__").split("__"));

        let config: AppConfig = figment.extract().context("failed to parse configuration")?;
        config.validate().context("configuration failed validation")?;
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn max_horizon_over_ring_capacity_is_rejected() {
        let cfg = StorageConfig {
            unit_capacity_kw: 6.0,
            max_horizon: 100,
            ring_capacity: 96,
        };
        assert!(cfg.validate().is_err());
    }
}
