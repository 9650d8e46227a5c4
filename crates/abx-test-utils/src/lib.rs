//! Testing utilities for ABX workspace
//!
//! Shared fixtures, population builders and storage wrappers.

#![allow(missing_docs)]

use abx_core::storage::{ParticipantFilter, UpsertFn};
use abx_core::{
    EngineConfig, ExperimentConfig, ExperimentDefinition, ExperimentEngine, MemoryStorage, Metric,
    MetricType, Participant, ParticipantKey, Storage, StorageError, TestId, Upsert, UpsertResult,
    Variant,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Seed used by deterministic engines
pub const TEST_SEED: u64 = 7;

/// Control vs. one treatment, 50/50, primary conversion metric 10% -> 15%
pub fn two_arm_config(id: &str) -> ExperimentConfig {
    ExperimentConfig::new("Hero CTA", "landing-page")
        .with_id(id)
        .with_hypothesis("Urgent copy lifts signups")
        .with_variant(Variant::control("control", "Control", 50.0))
        .with_variant(Variant::new("urgent", "Urgent CTA", 50.0))
        .with_metric(Metric::new("signup", "Signups", MetricType::Conversion, 0.10, 0.15).primary())
        .with_metric(Metric::new("revenue", "Revenue", MetricType::Revenue, 0.0, 0.0))
}

/// Control plus two treatments with uneven weights
pub fn three_arm_config(id: &str) -> ExperimentConfig {
    ExperimentConfig::new("Pricing page", "pricing")
        .with_id(id)
        .with_variant(Variant::control("control", "Control", 50.0))
        .with_variant(Variant::new("annual", "Annual first", 30.0))
        .with_variant(Variant::new("monthly", "Monthly first", 20.0))
        .with_metric(Metric::new("upgrade", "Upgrades", MetricType::Conversion, 0.05, 0.07).primary())
}

pub fn seeded_config() -> EngineConfig {
    EngineConfig::new().with_rng_seed(TEST_SEED)
}

/// Seeded engine over a fresh in-memory store
pub fn memory_engine() -> ExperimentEngine {
    engine_with(Arc::new(MemoryStorage::new()))
}

pub fn engine_with(storage: Arc<dyn Storage>) -> ExperimentEngine {
    ExperimentEngine::new(storage, seeded_config()).unwrap()
}

/// Create and start `config`
pub async fn running_test(engine: &ExperimentEngine, config: ExperimentConfig) -> ExperimentDefinition {
    let def = engine.create_test(config).await.unwrap();
    engine.start_test(&def.id).await.unwrap()
}

/// `size` participants of one variant, the first `conversions` converted
/// with `value` each
pub fn population(
    test_id: &TestId,
    variant_id: &str,
    size: usize,
    conversions: usize,
    value: f64,
    assigned_at: DateTime<Utc>,
) -> Vec<Participant> {
    (0..size)
        .map(|i| {
            let key = ParticipantKey::new(format!("{variant_id}-{i}"), test_id.clone());
            let mut p = Participant::new(key, variant_id);
            p.assigned_at = assigned_at;
            if i < conversions {
                p.converted = true;
                p.conversion_value = value;
                p.converted_at = Some(assigned_at);
            }
            p
        })
        .collect()
}

/// Write participants straight into `storage`
pub async fn seed_participants(storage: &dyn Storage, participants: Vec<Participant>) {
    for participant in participants {
        let key = participant.key();
        storage
            .upsert_participant(&key, Box::new(move |_| Upsert::Put(participant)))
            .await
            .unwrap();
    }
}

/// Storage that delays participant calls, for timeout tests. Test
/// definition calls are not delayed.
#[derive(Debug, Default)]
pub struct SlowStorage {
    inner: MemoryStorage,
    delay: Duration,
}

impl SlowStorage {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStorage::new(),
            delay,
        }
    }

    async fn pause(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl Storage for SlowStorage {
    async fn save_test(&self, test: &ExperimentDefinition) -> Result<(), StorageError> {
        // Lifecycle writes stay fast so tests can be set up.
        self.inner.save_test(test).await
    }

    async fn get_test(&self, id: &TestId) -> Result<Option<ExperimentDefinition>, StorageError> {
        self.inner.get_test(id).await
    }

    async fn list_tests(&self) -> Result<Vec<ExperimentDefinition>, StorageError> {
        self.inner.list_tests().await
    }

    async fn get_participant(
        &self,
        key: &ParticipantKey,
    ) -> Result<Option<Participant>, StorageError> {
        self.pause().await;
        self.inner.get_participant(key).await
    }

    async fn upsert_participant(
        &self,
        key: &ParticipantKey,
        f: UpsertFn,
    ) -> Result<UpsertResult, StorageError> {
        self.pause().await;
        self.inner.upsert_participant(key, f).await
    }

    async fn list_participants(&self, test_id: &TestId) -> Result<Vec<Participant>, StorageError> {
        self.pause().await;
        self.inner.list_participants(test_id).await
    }

    async fn remove_participants(
        &self,
        test_id: &TestId,
        filter: ParticipantFilter<'_>,
    ) -> Result<usize, StorageError> {
        self.pause().await;
        self.inner.remove_participants(test_id, filter).await
    }
}
