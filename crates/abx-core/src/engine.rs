//! Experiment engine (lifecycle manager)
//!
//! The entry point for callers. Owns the registry of running tests and
//! coordinates validation, assignment, tracking and statistics:
//! - Creates and transitions experiment definitions
//! - Buckets sessions into variants of running tests
//! - Records events and conversions
//! - Computes, freezes and reports results

use crate::assignment::{Assigner, Assignment};
use crate::config::EngineConfig;
use crate::error::{EngineError, StorageError};
use crate::lifecycle::can_transition;
use crate::report;
use crate::stats::{compute_results, DecisionPolicy};
use crate::storage::{with_timeout, Storage};
use crate::tracking::{ConversionOutcome, TrackOutcome, Tracker};
use crate::types::{
    ExperimentConfig, ExperimentDefinition, ExperimentResults, Participant, ParticipantKey,
    SessionContext, SessionId, TestId, TestReport, TestStatus, Variant,
};
use crate::validation::build_definition;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Notifications for downstream collaborators (analytics transport, dashboards)
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A test moved between lifecycle states
    StatusChanged {
        test_id: TestId,
        from: TestStatus,
        to: TestStatus,
    },
    /// A session was bucketed for the first time
    VariantAssigned {
        test_id: TestId,
        session_id: SessionId,
        variant_id: String,
    },
    /// A conversion was accepted
    ConversionRecorded {
        test_id: TestId,
        session_id: SessionId,
        value: f64,
    },
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The experimentation engine
#[derive(Debug)]
pub struct ExperimentEngine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    /// Running tests, eligible for assignment
    active: DashMap<TestId, Arc<ExperimentDefinition>>,
    assigner: Assigner,
    tracker: Tracker,
    policy: DecisionPolicy,
    /// Serializes lifecycle transitions
    lifecycle: Mutex<()>,
    /// Per-test gate: assignment and tracking hold it shared, `stop_test`
    /// holds it exclusively so no write lands after the frozen snapshot
    gates: DashMap<TestId, Arc<RwLock<()>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl ExperimentEngine {
    /// Create engine over `storage`
    ///
    /// The active registry starts empty; use [`Self::open`] to reload
    /// running tests.
    ///
    /// # Errors
    /// Returns `EngineError::Config` if `config` is invalid
    pub fn new(storage: Arc<dyn Storage>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let timeout = config.storage_timeout();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            assigner: Assigner::new(Arc::clone(&storage), timeout, config.rng_seed),
            tracker: Tracker::new(
                Arc::clone(&storage),
                timeout,
                config.max_events_per_participant,
            ),
            policy: DecisionPolicy::from(&config),
            active: DashMap::new(),
            lifecycle: Mutex::new(()),
            gates: DashMap::new(),
            events,
            storage,
            config,
        })
    }

    /// Create engine and reload persisted running tests
    ///
    /// # Errors
    /// Returns `EngineError` if the config is invalid or storage fails
    pub async fn open(storage: Arc<dyn Storage>, config: EngineConfig) -> Result<Self, EngineError> {
        let engine = Self::new(storage, config)?;
        engine.reconcile().await?;
        Ok(engine)
    }

    /// Reload every persisted `running` test into the active registry
    ///
    /// # Errors
    /// Returns `EngineError::Storage` if tests cannot be listed
    pub async fn reconcile(&self) -> Result<usize, EngineError> {
        let tests = self.call(self.storage.list_tests()).await?;
        let mut restored = 0;
        for test in tests {
            if test.status == TestStatus::Running {
                self.active.insert(test.id.clone(), Arc::new(test));
                restored += 1;
            }
        }
        tracing::info!(restored, "Reloaded running tests");
        Ok(restored)
    }

    /// Subscribe to engine notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ids of tests currently eligible for assignment
    #[must_use]
    pub fn active_test_ids(&self) -> Vec<TestId> {
        let mut ids: Vec<TestId> = self.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn call<T, F>(&self, call: F) -> Result<T, StorageError>
    where
        F: std::future::Future<Output = Result<T, StorageError>>,
    {
        with_timeout(self.config.storage_timeout(), call).await
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn gate(&self, test_id: &TestId) -> Arc<RwLock<()>> {
        Arc::clone(self.gates.entry(test_id.clone()).or_default().value())
    }

    /// Fail unless the test still accepts events
    async fn ensure_collecting(
        &self,
        test_id: &TestId,
        action: &'static str,
    ) -> Result<(), EngineError> {
        let from = self.load(test_id).await?.status;
        if from.is_live() {
            return Ok(());
        }
        Err(EngineError::State {
            test_id: test_id.clone(),
            from,
            action,
        })
    }

    async fn load(&self, test_id: &TestId) -> Result<ExperimentDefinition, EngineError> {
        self.call(self.storage.get_test(test_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(test_id.clone()))
    }

    // ---- definitions -------------------------------------------------

    /// Validate a config and persist it as a draft
    ///
    /// # Errors
    /// - `EngineError::Validation` if the config violates an invariant
    /// - `EngineError::Storage` if the draft cannot be saved
    pub async fn create_test(
        &self,
        config: ExperimentConfig,
    ) -> Result<ExperimentDefinition, EngineError> {
        let definition = build_definition(config, Utc::now())?;
        self.call(self.storage.save_test(&definition)).await?;
        tracing::info!(
            test_id = %definition.id,
            owner_id = %definition.owner_id,
            variants = definition.variants.len(),
            min_sample_size = ?definition.schedule.min_sample_size,
            "Test created"
        );
        Ok(definition)
    }

    /// Fetch a test definition
    ///
    /// # Errors
    /// Returns `EngineError::NotFound` for an unknown id
    pub async fn get_test(&self, test_id: &TestId) -> Result<ExperimentDefinition, EngineError> {
        self.load(test_id).await
    }

    /// All test definitions
    ///
    /// # Errors
    /// Returns `EngineError::Storage` if storage fails
    pub async fn list_tests(&self) -> Result<Vec<ExperimentDefinition>, EngineError> {
        Ok(self.call(self.storage.list_tests()).await?)
    }

    /// Tests owned by one entity (technique, page, campaign)
    ///
    /// # Errors
    /// Returns `EngineError::Storage` if storage fails
    pub async fn get_tests_for_technique(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ExperimentDefinition>, EngineError> {
        let tests = self.list_tests().await?;
        Ok(tests.into_iter().filter(|t| t.owner_id == owner_id).collect())
    }

    // ---- lifecycle ---------------------------------------------------

    async fn transition(
        &self,
        test_id: &TestId,
        expected: TestStatus,
        to: TestStatus,
        action: &'static str,
    ) -> Result<ExperimentDefinition, EngineError> {
        let _guard = self.lifecycle.lock().await;
        let mut definition = self.load(test_id).await?;
        let from = definition.status;
        if from != expected || !can_transition(from, to) {
            return Err(EngineError::State {
                test_id: test_id.clone(),
                from,
                action,
            });
        }

        let now = Utc::now();
        definition.status = to;
        definition.updated_at = now;
        if to == TestStatus::Running && definition.schedule.start_date.is_none() {
            definition.schedule.start_date = Some(now);
        }
        self.call(self.storage.save_test(&definition)).await?;

        if to == TestStatus::Running {
            self.active
                .insert(definition.id.clone(), Arc::new(definition.clone()));
        } else {
            self.active.remove(&definition.id);
        }

        tracing::info!(test_id = %test_id, %from, %to, action, "Test status changed");
        self.emit(EngineEvent::StatusChanged {
            test_id: test_id.clone(),
            from,
            to,
        });
        Ok(definition)
    }

    /// Begin receiving traffic; requires `draft`
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::State` if the test is not a draft
    pub async fn start_test(&self, test_id: &TestId) -> Result<ExperimentDefinition, EngineError> {
        self.transition(test_id, TestStatus::Draft, TestStatus::Running, "start")
            .await
    }

    /// Stop receiving traffic temporarily; requires `running`
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::State` if the test is not running
    pub async fn pause_test(&self, test_id: &TestId) -> Result<ExperimentDefinition, EngineError> {
        self.transition(test_id, TestStatus::Running, TestStatus::Paused, "pause")
            .await
    }

    /// Resume a paused test
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::State` if the test is not paused
    pub async fn resume_test(&self, test_id: &TestId) -> Result<ExperimentDefinition, EngineError> {
        self.transition(test_id, TestStatus::Paused, TestStatus::Running, "resume")
            .await
    }

    /// Retire a completed test
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::State` if the test is not completed
    pub async fn archive_test(&self, test_id: &TestId) -> Result<ExperimentDefinition, EngineError> {
        self.transition(test_id, TestStatus::Completed, TestStatus::Archived, "archive")
            .await
    }

    /// Complete a running or paused test and freeze its results
    ///
    /// Results are computed from one participant snapshot taken after the
    /// test left the active registry. In-flight assignments and tracking
    /// calls finish before the snapshot; later ones see a completed test.
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::State` if the test is neither running nor paused
    /// - `EngineError::Storage` if the snapshot or save fails; the test
    ///   then keeps its previous state
    pub async fn stop_test(&self, test_id: &TestId) -> Result<ExperimentResults, EngineError> {
        let _guard = self.lifecycle.lock().await;
        let gate = self.gate(test_id);
        let _exclusive = gate.write().await;
        let mut definition = self.load(test_id).await?;
        let from = definition.status;
        if !can_transition(from, TestStatus::Completed) {
            return Err(EngineError::State {
                test_id: test_id.clone(),
                from,
                action: "stop",
            });
        }

        let deactivated = self.active.remove(test_id);
        let restore = |err: EngineError| {
            if let Some((id, def)) = deactivated.clone() {
                self.active.insert(id, def);
            }
            err
        };

        let participants = self
            .call(self.storage.list_participants(test_id))
            .await
            .map_err(|e| restore(e.into()))?;

        let now = Utc::now();
        definition.status = TestStatus::Completed;
        definition.updated_at = now;
        definition.schedule.end_date = Some(now);

        let mut results = compute_results(&definition, &participants, &self.policy, now);
        report::annotate(&definition, &mut results, now);
        definition.results = Some(results.clone());

        self.call(self.storage.save_test(&definition))
            .await
            .map_err(|e| restore(e.into()))?;

        tracing::info!(
            test_id = %test_id,
            %from,
            participants = participants.len(),
            winner = ?results.winner.as_ref().map(|w| w.variant_id.as_str()),
            "Test stopped"
        );
        self.emit(EngineEvent::StatusChanged {
            test_id: test_id.clone(),
            from,
            to: TestStatus::Completed,
        });
        Ok(results)
    }

    // ---- assignment and tracking -------------------------------------

    /// Assign a session to a variant, reporting failures
    ///
    /// Returns `Ok(None)` if the test is not running or the session fails
    /// targeting.
    ///
    /// # Errors
    /// Returns `EngineError::Storage` if persistence fails or times out
    pub async fn try_assign(
        &self,
        session_id: &SessionId,
        test_id: &TestId,
        context: &SessionContext,
    ) -> Result<Option<Assignment>, EngineError> {
        if !self.active.contains_key(test_id) {
            return Ok(None);
        }
        let gate = self.gate(test_id);
        let _shared = gate.read().await;
        // Re-read under the gate: a stop may have completed while waiting.
        let Some(definition) = self.active.get(test_id).map(|d| Arc::clone(d.value())) else {
            return Ok(None);
        };

        let assignment = self.assigner.assign(&definition, session_id, context).await?;
        if let Some(assignment) = assignment.as_ref().filter(|a| a.newly_assigned) {
            metrics::counter!("abx_assignments_total", "test_id" => test_id.to_string())
                .increment(1);
            self.emit(EngineEvent::VariantAssigned {
                test_id: test_id.clone(),
                session_id: session_id.clone(),
                variant_id: assignment.variant.id.clone(),
            });
        }
        Ok(assignment)
    }

    /// Assign a session with targeting attributes
    ///
    /// Never fails: storage errors and timeouts degrade to `None` so that
    /// page rendering does not depend on the engine.
    pub async fn assign_with_context(
        &self,
        session_id: &SessionId,
        test_id: &TestId,
        context: &SessionContext,
    ) -> Option<Variant> {
        match self.try_assign(session_id, test_id, context).await {
            Ok(assignment) => assignment.map(|a| a.variant),
            Err(EngineError::Storage(StorageError::Timeout { timeout_ms })) => {
                tracing::warn!(
                    test_id = %test_id,
                    session_id = %session_id,
                    timeout_ms,
                    "Assignment timed out, serving default content"
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    test_id = %test_id,
                    session_id = %session_id,
                    error = %e,
                    "Assignment failed, serving default content"
                );
                None
            }
        }
    }

    /// Assign a session with no targeting attributes
    pub async fn assign(&self, session_id: &SessionId, test_id: &TestId) -> Option<Variant> {
        self.assign_with_context(session_id, test_id, &SessionContext::default())
            .await
    }

    /// Append an event to an existing participant's log
    ///
    /// Only running and paused tests accept events.
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::State` if the test is a draft or finished
    /// - `EngineError::Storage` if persistence fails or times out
    pub async fn track_event(
        &self,
        session_id: &SessionId,
        test_id: &TestId,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<TrackOutcome, EngineError> {
        let gate = self.gate(test_id);
        let _shared = gate.read().await;
        self.ensure_collecting(test_id, "track").await?;
        let key = ParticipantKey::new(session_id.clone(), test_id.clone());
        Ok(self.tracker.track_event(&key, event_type, data).await?)
    }

    /// Record a participant's conversion, at most once
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::State` if the test is a draft or finished
    /// - `EngineError::Storage` if persistence fails or times out
    pub async fn record_conversion(
        &self,
        session_id: &SessionId,
        test_id: &TestId,
        conversion_type: &str,
        value: f64,
        metadata: serde_json::Value,
    ) -> Result<ConversionOutcome, EngineError> {
        let gate = self.gate(test_id);
        let _shared = gate.read().await;
        self.ensure_collecting(test_id, "convert").await?;
        let key = ParticipantKey::new(session_id.clone(), test_id.clone());
        let outcome = self
            .tracker
            .record_conversion(&key, conversion_type, value, metadata)
            .await?;
        if outcome == ConversionOutcome::Recorded {
            metrics::counter!("abx_conversions_total", "test_id" => test_id.to_string())
                .increment(1);
            self.emit(EngineEvent::ConversionRecorded {
                test_id: test_id.clone(),
                session_id: session_id.clone(),
                value,
            });
        }
        Ok(outcome)
    }

    // ---- results and reporting ---------------------------------------

    async fn fresh_results(
        &self,
        definition: &ExperimentDefinition,
        now: DateTime<Utc>,
    ) -> Result<ExperimentResults, EngineError> {
        let participants = self
            .call(self.storage.list_participants(&definition.id))
            .await?;
        let mut results = compute_results(definition, &participants, &self.policy, now);
        report::annotate(definition, &mut results, now);
        Ok(results)
    }

    /// Results of a test
    ///
    /// Completed and archived tests return their frozen snapshot; running
    /// and paused tests are computed on demand; drafts have none.
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::Storage` if storage fails
    pub async fn get_test_results(
        &self,
        test_id: &TestId,
    ) -> Result<Option<ExperimentResults>, EngineError> {
        let definition = self.load(test_id).await?;
        match definition.status {
            TestStatus::Draft => Ok(None),
            TestStatus::Completed | TestStatus::Archived => Ok(definition.results),
            TestStatus::Running | TestStatus::Paused => {
                Ok(Some(self.fresh_results(&definition, Utc::now()).await?))
            }
        }
    }

    /// Summary, variant table, timeline, insights and recommendations
    ///
    /// # Errors
    /// - `EngineError::NotFound` for an unknown id
    /// - `EngineError::Storage` if storage fails
    pub async fn generate_test_report(&self, test_id: &TestId) -> Result<TestReport, EngineError> {
        let definition = self.load(test_id).await?;
        let now = Utc::now();
        let results = match &definition.results {
            Some(frozen) if definition.status.is_finished() => frozen.clone(),
            _ => self.fresh_results(&definition, now).await?,
        };
        Ok(report::build_report(&definition, &results, now))
    }

    // ---- maintenance -------------------------------------------------

    /// Remove stale, unconverted participants of live tests
    ///
    /// # Errors
    /// Returns `EngineError::Storage` if storage fails
    pub async fn cleanup_expired_sessions(&self) -> Result<usize, EngineError> {
        self.cleanup_expired_sessions_at(Utc::now()).await
    }

    /// [`Self::cleanup_expired_sessions`] against an explicit clock
    ///
    /// # Errors
    /// Returns `EngineError::Storage` if storage fails
    pub async fn cleanup_expired_sessions_at(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let Ok(timeout) = chrono::Duration::from_std(self.config.session_timeout()) else {
            return Ok(0);
        };
        let Some(cutoff) = now.checked_sub_signed(timeout) else {
            return Ok(0);
        };

        let tests = self.list_tests().await?;
        let mut removed = 0;
        for test in tests.iter().filter(|t| t.status.is_live()) {
            let gate = self.gate(&test.id);
            let _shared = gate.read().await;
            // Skip tests stopped since the listing.
            if !self.load(&test.id).await?.status.is_live() {
                continue;
            }
            let expired = move |p: &Participant| !p.converted && p.assigned_at < cutoff;
            let count = self
                .call(self.storage.remove_participants(&test.id, &expired))
                .await?;
            if count > 0 {
                tracing::info!(test_id = %test.id, removed = count, "Removed expired sessions");
            }
            removed += count;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{Metric, MetricType};
    use serde_json::json;

    fn config(id: &str) -> ExperimentConfig {
        ExperimentConfig::new("Pricing CTA", "technique-7")
            .with_id(id)
            .with_variant(Variant::control("control", "Control", 50.0))
            .with_variant(Variant::new("b", "Bold CTA", 50.0))
            .with_metric(Metric::new("signup", "Signups", MetricType::Conversion, 0.1, 0.15).primary())
    }

    fn engine() -> ExperimentEngine {
        ExperimentEngine::new(
            Arc::new(MemoryStorage::new()),
            EngineConfig::default().with_rng_seed(42),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_invalid_atomically() {
        let engine = engine();
        let mut bad = config("t-bad");
        bad.variants[1].weight = 10.0;
        let err = engine.create_test(bad).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(engine.list_tests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn draft_is_not_assignable() {
        let engine = engine();
        let def = engine.create_test(config("t-1")).await.unwrap();
        assert!(engine.assign(&"s-1".into(), &def.id).await.is_none());
    }

    #[tokio::test]
    async fn start_requires_draft() {
        let engine = engine();
        let def = engine.create_test(config("t-1")).await.unwrap();
        let started = engine.start_test(&def.id).await.unwrap();
        assert_eq!(started.status, TestStatus::Running);
        assert!(started.schedule.start_date.is_some());

        let err = engine.start_test(&def.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::State {
                from: TestStatus::Running,
                action: "start",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn pause_removes_from_registry() {
        let engine = engine();
        let def = engine.create_test(config("t-1")).await.unwrap();
        engine.start_test(&def.id).await.unwrap();
        assert_eq!(engine.active_test_ids(), vec![def.id.clone()]);

        engine.pause_test(&def.id).await.unwrap();
        assert!(engine.active_test_ids().is_empty());
        assert!(engine.assign(&"s-1".into(), &def.id).await.is_none());

        engine.resume_test(&def.id).await.unwrap();
        assert!(engine.assign(&"s-1".into(), &def.id).await.is_some());
    }

    #[tokio::test]
    async fn unknown_test_surfaces_not_found() {
        let engine = engine();
        let id = TestId::from("missing");
        assert!(matches!(engine.start_test(&id).await, Err(EngineError::NotFound(_))));
        assert!(matches!(engine.stop_test(&id).await, Err(EngineError::NotFound(_))));
        assert!(matches!(
            engine.get_test_results(&id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn tracking_emits_notifications() {
        let engine = engine();
        let mut rx = engine.subscribe();
        let def = engine.create_test(config("t-1")).await.unwrap();
        engine.start_test(&def.id).await.unwrap();

        let session = SessionId::from("s-1");
        let variant = engine.assign(&session, &def.id).await.unwrap();
        engine
            .record_conversion(&session, &def.id, "signup", 12.0, json!(null))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::StatusChanged { .. }));
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::VariantAssigned {
                test_id: def.id.clone(),
                session_id: session.clone(),
                variant_id: variant.id,
            }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::ConversionRecorded { value, .. } if value == 12.0
        ));
    }

    #[tokio::test]
    async fn draft_has_no_results() {
        let engine = engine();
        let def = engine.create_test(config("t-1")).await.unwrap();
        assert!(engine.get_test_results(&def.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archive_requires_completed() {
        let engine = engine();
        let def = engine.create_test(config("t-1")).await.unwrap();
        engine.start_test(&def.id).await.unwrap();
        assert!(matches!(
            engine.archive_test(&def.id).await,
            Err(EngineError::State { .. })
        ));
        engine.stop_test(&def.id).await.unwrap();
        let archived = engine.archive_test(&def.id).await.unwrap();
        assert_eq!(archived.status, TestStatus::Archived);
        assert!(engine.get_test_results(&def.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn finished_tests_reject_tracking() {
        let engine = engine();
        let def = engine.create_test(config("t-1")).await.unwrap();
        let session = SessionId::from("s-1");

        assert!(matches!(
            engine.track_event(&session, &def.id, "click", json!({})).await,
            Err(EngineError::State { from: TestStatus::Draft, action: "track", .. })
        ));

        engine.start_test(&def.id).await.unwrap();
        engine.assign(&session, &def.id).await.unwrap();
        let frozen = engine.stop_test(&def.id).await.unwrap();

        assert!(matches!(
            engine.track_event(&session, &def.id, "click", json!({})).await,
            Err(EngineError::State { from: TestStatus::Completed, action: "track", .. })
        ));
        assert!(matches!(
            engine
                .record_conversion(&session, &def.id, "signup", 5.0, json!(null))
                .await,
            Err(EngineError::State { from: TestStatus::Completed, action: "convert", .. })
        ));
        assert!(matches!(
            engine
                .record_conversion(&session, &"missing".into(), "signup", 5.0, json!(null))
                .await,
            Err(EngineError::NotFound(_))
        ));

        let results = engine.get_test_results(&def.id).await.unwrap().unwrap();
        assert_eq!(results, frozen);
        assert_eq!(results.total_conversions(), 0);
    }
}
