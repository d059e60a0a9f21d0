//! # Session Configuration
//!
//! Loaded from TOML. Every key is optional:
//!
//! ```toml
//! tick_rate = 60
//! max_catch_up_ticks = 5
//! ping_interval_ms = 1000
//! simulated_latency_ms = 120
//! interpolate = true
//! rotation_blend = "snap"     # or "lerp"
//! broadcast_interval = 3
//! max_clients = 8
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{DEFAULT_MAX_CATCH_UP_TICKS, DEFAULT_PING_INTERVAL_MS, DEFAULT_TICK_RATE, MAX_CLIENTS};

/// How a follower's rotation moves between two snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationBlend {
    /// Take the newer snapshot's orientation.
    #[default]
    Snap,
    /// Interpolate each Euler axis along the shortest arc.
    Lerp,
}

/// Tunables for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Fixed updates per second.
    pub tick_rate: u32,
    /// Most fixed updates run in one frame after a stall.
    pub max_catch_up_ticks: u32,
    /// Client ping cadence.
    pub ping_interval_ms: u64,
    /// Artificial one-way delay applied by both links.
    pub simulated_latency_ms: Option<f64>,
    /// Whether followers interpolate remote transforms.
    pub interpolate: bool,
    /// Follower rotation behavior.
    pub rotation_blend: RotationBlend,
    /// Ticks between physics snapshots when clients predict.
    pub broadcast_interval: u32,
    /// Host slot limit.
    pub max_clients: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_catch_up_ticks: DEFAULT_MAX_CATCH_UP_TICKS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            simulated_latency_ms: None,
            interpolate: true,
            rotation_blend: RotationBlend::Snap,
            broadcast_interval: 1,
            max_clients: MAX_CLIENTS,
        }
    }
}

impl SessionConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// `Parse` for malformed TOML or unknown keys, `Invalid` for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`SessionConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// `Invalid` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be > 0".to_owned()));
        }
        if self.broadcast_interval == 0 {
            return Err(ConfigError::Invalid("broadcast_interval must be >= 1".to_owned()));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be >= 1".to_owned()));
        }
        if self.max_catch_up_ticks == 0 {
            return Err(ConfigError::Invalid("max_catch_up_ticks must be >= 1".to_owned()));
        }
        if self.simulated_latency_ms.is_some_and(|ms| !ms.is_finite() || ms < 0.0) {
            return Err(ConfigError::Invalid(
                "simulated_latency_ms must be a non-negative number".to_owned(),
            ));
        }
        Ok(())
    }

    /// Tick interval in milliseconds.
    #[must_use]
    pub fn tick_interval_ms(&self) -> f64 {
        1000.0 / f64::from(self.tick_rate.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(SessionConfig::from_toml_str("").unwrap(), SessionConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = SessionConfig::from_toml_str(
            r#"
            tick_rate = 30
            simulated_latency_ms = 80.0
            rotation_blend = "lerp"
            broadcast_interval = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.simulated_latency_ms, Some(80.0));
        assert_eq!(config.rotation_blend, RotationBlend::Lerp);
        assert_eq!(config.broadcast_interval, 3);
        assert!(config.interpolate);
        assert!((config.tick_interval_ms() - 33.333).abs() < 1e-2);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            SessionConfig::from_toml_str("tick_rate = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("broadcast_interval = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("simulated_latency_ms = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_max_clients_is_rejected() {
        let err = SessionConfig::from_toml_str("max_clients = 0").unwrap_err();
        assert!(err.to_string().contains("max_clients"), "{err}");
        assert!(SessionConfig::from_toml_str("max_clients = 1").is_ok());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            SessionConfig::from_toml_str("tickrate = 60"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SessionConfig::load("/definitely/not/here.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
