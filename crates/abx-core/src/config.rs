//! Engine configuration
//!
//! [`EngineConfig`] carries storage timeouts, session retention and the
//! decision thresholds of the statistics engine. It can be built in code or
//! loaded from TOML.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on every storage call, in milliseconds
    pub storage_timeout_ms: u64,
    /// Unconverted participants older than this are eligible for cleanup
    pub session_timeout_secs: u64,
    /// Confidence (percent) at which a variant counts as significant
    pub significance_threshold: f64,
    /// Minimum improvement (percent) for `implement`
    pub implement_min_improvement: f64,
    /// Minimum confidence (percent) for `test_further`
    pub test_further_min_confidence: f64,
    /// Minimum improvement (percent) for `test_further`
    pub test_further_min_improvement: f64,
    /// Event log cap per participant; oldest events are dropped
    pub max_events_per_participant: usize,
    /// Seed for reproducible bucketing
    pub rng_seed: Option<u64>,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML
    /// - `ConfigError::InvalidValue` on out-of-range values
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed or validated
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.session_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(self.significance_threshold > 0.0 && self.significance_threshold <= 95.0) {
            return Err(ConfigError::InvalidValue {
                field: "significance_threshold",
                reason: format!(
                    "must be in (0, 95], reported confidence never exceeds 95 (got {})",
                    self.significance_threshold
                ),
            });
        }
        for (field, value) in [
            ("implement_min_improvement", self.implement_min_improvement),
            ("test_further_min_confidence", self.test_further_min_confidence),
            ("test_further_min_improvement", self.test_further_min_improvement),
        ] {
            // Range check also rejects NaN
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be in [0, 100], got {value}"),
                });
            }
        }
        if self.max_events_per_participant == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_events_per_participant",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// With storage timeout
    #[inline]
    #[must_use]
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With session timeout
    #[inline]
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout_secs = timeout.as_secs();
        self
    }

    /// With deterministic bucketing
    #[inline]
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// With event log cap
    #[inline]
    #[must_use]
    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events_per_participant = max;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_timeout_ms: 250,
            session_timeout_secs: 30 * 24 * 60 * 60,
            significance_threshold: 95.0,
            implement_min_improvement: 10.0,
            test_further_min_confidence: 80.0,
            test_further_min_improvement: 5.0,
            max_events_per_participant: 1000,
            rng_seed: None,
        }
    }
}
