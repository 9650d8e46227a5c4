//! Persistence for experiment definitions and participant records
//!
//! The [`Storage`] trait is the only seam between the engine and a backing
//! store. Participant writes go through [`Storage::upsert_participant`],
//! which must run its closure atomically against the current record so that
//! sticky assignment and idempotent conversion hold under concurrent callers.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::types::{ExperimentDefinition, Participant, ParticipantKey, TestId};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Decision returned by an upsert closure
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// Leave the stored record untouched
    Keep,
    /// Replace (or create) the record
    Put(Participant),
}

/// Read-modify-write closure, run while the record is locked
pub type UpsertFn = Box<dyn FnOnce(Option<&Participant>) -> Upsert + Send>;

/// Outcome of an upsert
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    /// Record as stored after the call
    pub participant: Option<Participant>,
    /// Whether the closure wrote
    pub written: bool,
}

/// Predicate used by bulk removal
pub type ParticipantFilter<'a> = &'a (dyn Fn(&Participant) -> bool + Send + Sync);

/// Backing store for tests and participants
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Insert or replace a test definition
    async fn save_test(&self, test: &ExperimentDefinition) -> Result<(), StorageError>;

    /// Fetch a test definition
    async fn get_test(&self, id: &TestId) -> Result<Option<ExperimentDefinition>, StorageError>;

    /// All test definitions
    async fn list_tests(&self) -> Result<Vec<ExperimentDefinition>, StorageError>;

    /// Fetch one participant
    async fn get_participant(
        &self,
        key: &ParticipantKey,
    ) -> Result<Option<Participant>, StorageError>;

    /// Atomically read, decide and write one participant
    async fn upsert_participant(
        &self,
        key: &ParticipantKey,
        f: UpsertFn,
    ) -> Result<UpsertResult, StorageError>;

    /// Consistent snapshot of a test's participants
    async fn list_participants(&self, test_id: &TestId) -> Result<Vec<Participant>, StorageError>;

    /// Remove a test's participants matching `filter`, returning the count
    async fn remove_participants(
        &self,
        test_id: &TestId,
        filter: ParticipantFilter<'_>,
    ) -> Result<usize, StorageError>;
}

/// Bound a storage call by `timeout`
///
/// # Errors
/// Returns `StorageError::Timeout` if the call does not finish in time,
/// otherwise the call's own result.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_passes_result_through() {
        let value = with_timeout(Duration::from_millis(50), async { Ok::<_, StorageError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_reports_elapsed() {
        let result = with_timeout(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StorageError>(())
        })
        .await;
        assert!(matches!(result, Err(StorageError::Timeout { timeout_ms: 20 })));
    }
}
