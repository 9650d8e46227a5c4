//! In-memory storage backend
//!
//! Tests live in a `DashMap`; participants are partitioned per test, each
//! partition behind its own `RwLock` so that a listing is one consistent
//! snapshot and an upsert is one critical section.

use super::{ParticipantFilter, Storage, Upsert, UpsertFn, UpsertResult};
use crate::error::StorageError;
use crate::types::{ExperimentDefinition, Participant, ParticipantKey, SessionId, TestId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type Partition = Arc<RwLock<HashMap<SessionId, Participant>>>;

/// Lock-protected in-memory store
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tests: DashMap<TestId, ExperimentDefinition>,
    participants: DashMap<TestId, Partition>,
}

impl MemoryStorage {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously persisted records
    #[must_use]
    pub fn from_records(tests: Vec<ExperimentDefinition>, participants: Vec<Participant>) -> Self {
        let store = Self::new();
        for test in tests {
            store.tests.insert(test.id.clone(), test);
        }
        for participant in participants {
            store
                .partition(&participant.test_id)
                .write()
                .insert(participant.session_id.clone(), participant);
        }
        store
    }

    fn partition(&self, test_id: &TestId) -> Partition {
        Arc::clone(self.participants.entry(test_id.clone()).or_default().value())
    }

    fn existing_partition(&self, test_id: &TestId) -> Option<Partition> {
        self.participants.get(test_id).map(|p| Arc::clone(p.value()))
    }

    pub(crate) fn insert_test(&self, test: &ExperimentDefinition) {
        self.tests.insert(test.id.clone(), test.clone());
    }

    pub(crate) fn test(&self, id: &TestId) -> Option<ExperimentDefinition> {
        self.tests.get(id).map(|t| t.clone())
    }

    pub(crate) fn all_tests(&self) -> Vec<ExperimentDefinition> {
        let mut tests: Vec<_> = self.tests.iter().map(|t| t.value().clone()).collect();
        tests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tests
    }

    pub(crate) fn participant(&self, key: &ParticipantKey) -> Option<Participant> {
        let partition = self.existing_partition(&key.test_id)?;
        let guard = partition.read();
        guard.get(&key.session_id).cloned()
    }

    pub(crate) fn upsert(&self, key: &ParticipantKey, f: UpsertFn) -> UpsertResult {
        let partition = self.partition(&key.test_id);
        let mut guard = partition.write();
        match f(guard.get(&key.session_id)) {
            Upsert::Keep => UpsertResult {
                participant: guard.get(&key.session_id).cloned(),
                written: false,
            },
            Upsert::Put(participant) => {
                guard.insert(key.session_id.clone(), participant.clone());
                UpsertResult {
                    participant: Some(participant),
                    written: true,
                }
            }
        }
    }

    pub(crate) fn participants_of(&self, test_id: &TestId) -> Vec<Participant> {
        let Some(partition) = self.existing_partition(test_id) else {
            return Vec::new();
        };
        let guard = partition.read();
        let mut participants: Vec<_> = guard.values().cloned().collect();
        participants.sort_by(|a, b| {
            a.assigned_at
                .cmp(&b.assigned_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        participants
    }

    pub(crate) fn remove_matching(&self, test_id: &TestId, filter: ParticipantFilter<'_>) -> usize {
        let Some(partition) = self.existing_partition(test_id) else {
            return 0;
        };
        let mut guard = partition.write();
        let before = guard.len();
        guard.retain(|_, p| !filter(p));
        before - guard.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_test(&self, test: &ExperimentDefinition) -> Result<(), StorageError> {
        self.insert_test(test);
        Ok(())
    }

    async fn get_test(&self, id: &TestId) -> Result<Option<ExperimentDefinition>, StorageError> {
        Ok(self.test(id))
    }

    async fn list_tests(&self) -> Result<Vec<ExperimentDefinition>, StorageError> {
        Ok(self.all_tests())
    }

    async fn get_participant(
        &self,
        key: &ParticipantKey,
    ) -> Result<Option<Participant>, StorageError> {
        Ok(self.participant(key))
    }

    async fn upsert_participant(
        &self,
        key: &ParticipantKey,
        f: UpsertFn,
    ) -> Result<UpsertResult, StorageError> {
        Ok(self.upsert(key, f))
    }

    async fn list_participants(&self, test_id: &TestId) -> Result<Vec<Participant>, StorageError> {
        Ok(self.participants_of(test_id))
    }

    async fn remove_participants(
        &self,
        test_id: &TestId,
        filter: ParticipantFilter<'_>,
    ) -> Result<usize, StorageError> {
        Ok(self.remove_matching(test_id, filter))
    }
}
