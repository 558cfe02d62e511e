//! Configuration types

use crate::entities::{SlotId, DEFAULT_RECEIVING_SLOTS};
use crate::error::{ConfigError, WarplineResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Backing store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the LMDB environment for one world save.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub map_size_mb: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warpline-data"),
            map_size_mb: 64,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarplineConfig {
    /// Horizontal distance from the beam within which an interceptor catches it.
    pub interceptor_radius: f64,
    /// Seconds a transporter waits between sends.
    pub send_cooldown_secs: u64,
    /// Positions below this height count as covered regardless of sky access.
    pub min_usable_y: i32,
    /// Charges granted per fuel item.
    pub charges_per_fuel: u32,
    /// Receiving slots per transporter or interceptor.
    pub receiving_slots: SlotId,
    /// Cadence of the periodic coverage sweep.
    pub coverage_recheck_secs: u64,
    pub store: StoreConfig,
}

impl Default for WarplineConfig {
    fn default() -> Self {
        Self {
            interceptor_radius: 25.0,
            send_cooldown_secs: 10,
            min_usable_y: 50,
            charges_per_fuel: 1,
            receiving_slots: DEFAULT_RECEIVING_SLOTS,
            coverage_recheck_secs: 5,
            store: StoreConfig::default(),
        }
    }
}

impl WarplineConfig {
    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(source: &str) -> WarplineResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables on top of `self`.
    ///
    /// Environment variables:
    /// - `WARPLINE_INTERCEPTOR_RADIUS`
    /// - `WARPLINE_SEND_COOLDOWN_SECS`
    /// - `WARPLINE_MIN_USABLE_Y`
    /// - `WARPLINE_CHARGES_PER_FUEL`
    /// - `WARPLINE_COVERAGE_RECHECK_SECS`
    /// - `WARPLINE_STORE_PATH`
    /// - `WARPLINE_STORE_MAP_SIZE_MB`
    ///
    /// Unparseable values are ignored.
    pub fn with_env_overrides(self) -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
        }

        Self {
            interceptor_radius: var("WARPLINE_INTERCEPTOR_RADIUS").unwrap_or(self.interceptor_radius),
            send_cooldown_secs: var("WARPLINE_SEND_COOLDOWN_SECS").unwrap_or(self.send_cooldown_secs),
            min_usable_y: var("WARPLINE_MIN_USABLE_Y").unwrap_or(self.min_usable_y),
            charges_per_fuel: var("WARPLINE_CHARGES_PER_FUEL").unwrap_or(self.charges_per_fuel),
            receiving_slots: self.receiving_slots,
            coverage_recheck_secs: var("WARPLINE_COVERAGE_RECHECK_SECS")
                .unwrap_or(self.coverage_recheck_secs),
            store: StoreConfig {
                path: std::env::var("WARPLINE_STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(self.store.path),
                map_size_mb: var("WARPLINE_STORE_MAP_SIZE_MB").unwrap_or(self.store.map_size_mb),
            },
        }
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn send_cooldown(&self) -> Duration {
        Duration::from_secs(self.send_cooldown_secs)
    }

    pub fn coverage_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.coverage_recheck_secs)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - interceptor_radius is finite and non-negative
    /// - charges_per_fuel > 0
    /// - receiving_slots > 0
    /// - map_size_mb > 0
    pub fn validate(&self) -> WarplineResult<()> {
        if !self.interceptor_radius.is_finite() || self.interceptor_radius < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "interceptor_radius".to_string(),
                value: self.interceptor_radius.to_string(),
                reason: "interceptor_radius must be a finite, non-negative number".to_string(),
            }
            .into());
        }

        if self.charges_per_fuel == 0 {
            return Err(ConfigError::InvalidValue {
                field: "charges_per_fuel".to_string(),
                value: self.charges_per_fuel.to_string(),
                reason: "charges_per_fuel must be greater than 0".to_string(),
            }
            .into());
        }

        if self.receiving_slots == 0 {
            return Err(ConfigError::InvalidValue {
                field: "receiving_slots".to_string(),
                value: self.receiving_slots.to_string(),
                reason: "receiving_slots must be greater than 0".to_string(),
            }
            .into());
        }

        if self.store.map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store.map_size_mb".to_string(),
                value: self.store.map_size_mb.to_string(),
                reason: "map_size_mb must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WarplineError;

    #[test]
    fn test_default_is_valid() {
        let config = WarplineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.send_cooldown(), Duration::from_secs(10));
        assert_eq!(config.receiving_slots, 8);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = WarplineConfig::from_toml_str(
            r#"
            interceptor_radius = 10.0
            send_cooldown_secs = 3

            [store]
            path = "/tmp/world-1"
            map_size_mb = 16
            "#,
        )
        .expect("valid config");

        assert_eq!(config.interceptor_radius, 10.0);
        assert_eq!(config.send_cooldown_secs, 3);
        assert_eq!(config.min_usable_y, 50);
        assert_eq!(config.store.path, PathBuf::from("/tmp/world-1"));
    }

    #[test]
    fn test_invalid_radius_rejected() {
        let err = WarplineConfig::from_toml_str("interceptor_radius = -1.0").unwrap_err();
        assert!(matches!(
            err,
            WarplineError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "interceptor_radius"
        ));
    }

    #[test]
    fn test_zero_charges_per_fuel_rejected() {
        let config = WarplineConfig {
            charges_per_fuel: 0,
            ..WarplineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = WarplineConfig::from_toml_str("interceptor_radius = [").unwrap_err();
        assert!(matches!(err, WarplineError::Config(ConfigError::Parse { .. })));
    }
}
