//! ABX Core - Experimentation Engine
//!
//! Runs A/B and multivariate tests against live traffic:
//! - Validates experiment configs and plans sample sizes
//! - Buckets sessions into weighted variants, stickily
//! - Tracks participant events and idempotent conversions
//! - Computes significance, picks winners and writes reports
//!
//! # Example
//!
//! ```rust,ignore
//! use abx_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), EngineError> {
//! let engine = ExperimentEngine::new(Arc::new(MemoryStorage::new()), EngineConfig::new())?;
//!
//! let config = ExperimentConfig::new("Hero CTA", "landing-page")
//!     .with_variant(Variant::control("control", "Control", 50.0))
//!     .with_variant(Variant::new("urgent", "Urgent CTA", 50.0))
//!     .with_metric(Metric::new("signup", "Signups", MetricType::Conversion, 0.10, 0.15).primary());
//!
//! let test = engine.create_test(config).await?;
//! engine.start_test(&test.id).await?;
//!
//! let session = SessionId::from("session-1");
//! if let Some(variant) = engine.assign(&session, &test.id).await {
//!     println!("Rendering {}", variant.name);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod assignment;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod report;
pub mod stats;
pub mod storage;
pub mod tracking;
pub mod types;
pub mod validation;

pub use assignment::{Assigner, Assignment};
pub use config::EngineConfig;
pub use engine::{EngineEvent, ExperimentEngine};
pub use error::{ConfigError, EngineError, StorageError, ValidationError};
pub use stats::{DecisionPolicy, MAX_REPORTED_CONFIDENCE};
pub use storage::{FileStorage, MemoryStorage, Storage, Upsert, UpsertResult};
pub use tracking::{ConversionOutcome, TrackOutcome};
pub use types::{
    ContentModification, ExperimentConfig, ExperimentDefinition, ExperimentResults, Insight,
    InsightKind, Metric, MetricGoal, MetricType, Participant, ParticipantEvent, ParticipantKey,
    RecommendedAction, ReportSummary, Schedule, SessionContext, SessionId, Targeting,
    TargetingRule, TestId, TestReport, TestStatus, TimelinePoint, Variant, VariantPerformance,
    VariantResult, Winner,
};
pub use validation::{sample_size_for, validate_config};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with ABX Core
    pub use crate::{
        EngineConfig, EngineError, ExperimentConfig, ExperimentEngine, Metric, MetricType,
        MemoryStorage, SessionContext, SessionId, Targeting, TestId, TestStatus, Variant,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
