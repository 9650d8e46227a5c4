//! Error types for ABX Core
//!
//! Provides the error taxonomy of the engine:
//! - Definition validation failures
//! - Unknown tests
//! - Illegal lifecycle transitions
//! - Transient storage failures
//! - Configuration errors

use crate::types::{TestId, TestStatus};

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed experiment definition
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Unknown test id
    #[error("test not found: {0}")]
    NotFound(TestId),

    /// Illegal lifecycle transition
    #[error("cannot {action} test {test_id} in state {from}")]
    State {
        test_id: TestId,
        from: TestStatus,
        action: &'static str,
    },

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_retryable())
    }

    /// Check if error was caused by the caller's input
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::State { .. }
        )
    }
}

/// Definition validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Fewer than two variants
    #[error("at least 2 variants required, got {0}")]
    TooFewVariants(usize),

    /// A variant weight is outside [0, 100] or not a number
    #[error("variant {variant_id} weight must be within [0, 100], got {weight}")]
    WeightOutOfRange { variant_id: String, weight: f64 },

    /// Two variants share an id
    #[error("duplicate variant id {0}")]
    DuplicateVariantId(String),

    /// Weights do not add up to 100
    #[error("variant weights must sum to 100, got {0}")]
    WeightSumInvalid(f64),

    /// No control variant
    #[error("exactly one control variant required, none found")]
    MissingControl,

    /// More than one control variant
    #[error("exactly one control variant required, found {0}")]
    MultipleControls(usize),

    /// No metrics defined
    #[error("at least one metric required")]
    NoMetrics,

    /// Primary metric count is not exactly one
    #[error("exactly one primary metric required, found {0}")]
    MultiplePrimaryMetrics(usize),
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Call exceeded the configured storage timeout
    #[error("storage call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Backing store I/O failed
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store rejected a write
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Transient failures worth retrying
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_) | Self::Unavailable(_))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    /// Config file is not valid TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let err = EngineError::State {
            test_id: TestId::from("t-1"),
            from: TestStatus::Draft,
            action: "stop",
        };
        assert_eq!(err.to_string(), "cannot stop test t-1 in state draft");
    }

    #[test]
    fn engine_error_is_retryable() {
        assert!(EngineError::from(StorageError::Timeout { timeout_ms: 10 }).is_retryable());
        assert!(!EngineError::NotFound(TestId::from("x")).is_retryable());
        assert!(!EngineError::from(ValidationError::NoMetrics).is_retryable());
    }

    #[test]
    fn engine_error_is_client_error() {
        assert!(EngineError::from(ValidationError::MissingControl).is_client_error());
        assert!(EngineError::NotFound(TestId::from("x")).is_client_error());
        assert!(!EngineError::from(StorageError::Unavailable("down".into())).is_client_error());
    }

    #[test]
    fn serialization_error_not_retryable() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(!StorageError::from(json_err).is_retryable());
    }
}
