//! Embedded JSON file store
//!
//! Keeps a [`MemoryStorage`] mirror for reads, and one JSON document per
//! concern in a data directory:
//! - `tests.json` holds every test definition
//! - `participants/<test>.json` holds one test's participants
//!
//! Every write is persisted before it is applied to the mirror, so a failed
//! write leaves both the file and the mirror at the previous state. Files are
//! replaced by rename so a crash never leaves a torn document behind.

use super::{MemoryStorage, ParticipantFilter, Storage, Upsert, UpsertFn, UpsertResult};
use crate::error::StorageError;
use crate::types::{ExperimentDefinition, Participant, ParticipantKey, TestId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const TESTS_FILE: &str = "tests.json";
const PARTICIPANTS_DIR: &str = "participants";

/// Directory-backed store
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    mirror: MemoryStorage,
    /// Serializes rewrites of `tests.json`
    tests_lock: Mutex<()>,
    /// Serializes read-decide-persist-commit per test partition
    partition_locks: DashMap<TestId, Arc<Mutex<()>>>,
}

/// File name for a test's partition; bytes outside `[A-Za-z0-9_-]` are
/// escaped as `%XX`
fn partition_file_name(test_id: &TestId) -> String {
    let mut name = String::with_capacity(test_id.as_str().len() + 5);
    for byte in test_id.as_str().bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name.push_str(".json");
    name
}

impl FileStorage {
    /// Open (or create) a data directory and load its records
    ///
    /// # Errors
    /// - `StorageError::Io` if the directory cannot be created or read
    /// - `StorageError::Serialization` if a file is corrupt
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        let partitions_dir = dir.join(PARTICIPANTS_DIR);
        tokio::fs::create_dir_all(&partitions_dir).await?;

        let tests: Vec<ExperimentDefinition> = read_records(&dir.join(TESTS_FILE)).await?;

        let mut participants: Vec<Participant> = Vec::new();
        let mut entries = tokio::fs::read_dir(&partitions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                participants.extend(read_records::<Participant>(&path).await?);
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            tests = tests.len(),
            participants = participants.len(),
            "Loaded file store"
        );

        Ok(Self {
            dir,
            mirror: MemoryStorage::from_records(tests, participants),
            tests_lock: Mutex::new(()),
            partition_locks: DashMap::new(),
        })
    }

    /// Data directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn partition_path(&self, test_id: &TestId) -> PathBuf {
        self.dir
            .join(PARTICIPANTS_DIR)
            .join(partition_file_name(test_id))
    }

    fn partition_lock(&self, test_id: &TestId) -> Arc<Mutex<()>> {
        Arc::clone(self.partition_locks.entry(test_id.clone()).or_default().value())
    }

    async fn persist_partition(
        &self,
        test_id: &TestId,
        participants: &[Participant],
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(participants)?;
        write_atomic(&self.partition_path(test_id), &bytes).await
    }
}

async fn read_records<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Replace `path` by writing a sibling temp file and renaming it over
///
/// A call cancelled after the rename but before it returns leaves the file
/// one write ahead of the mirror; the file wins on the next open.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    async fn save_test(&self, test: &ExperimentDefinition) -> Result<(), StorageError> {
        let _guard = self.tests_lock.lock().await;
        let mut tests = self.mirror.all_tests();
        match tests.iter_mut().find(|t| t.id == test.id) {
            Some(slot) => *slot = test.clone(),
            None => tests.push(test.clone()),
        }
        let bytes = serde_json::to_vec_pretty(&tests)?;
        write_atomic(&self.dir.join(TESTS_FILE), &bytes).await?;

        self.mirror.insert_test(test);
        Ok(())
    }

    async fn get_test(&self, id: &TestId) -> Result<Option<ExperimentDefinition>, StorageError> {
        Ok(self.mirror.test(id))
    }

    async fn list_tests(&self) -> Result<Vec<ExperimentDefinition>, StorageError> {
        Ok(self.mirror.all_tests())
    }

    async fn get_participant(
        &self,
        key: &ParticipantKey,
    ) -> Result<Option<Participant>, StorageError> {
        Ok(self.mirror.participant(key))
    }

    async fn upsert_participant(
        &self,
        key: &ParticipantKey,
        f: UpsertFn,
    ) -> Result<UpsertResult, StorageError> {
        let lock = self.partition_lock(&key.test_id);
        let _guard = lock.lock().await;

        // The mirror only changes under this lock, so the decision holds
        // until the commit below.
        let current = self.mirror.participant(key);
        let participant = match f(current.as_ref()) {
            Upsert::Keep => {
                return Ok(UpsertResult {
                    participant: current,
                    written: false,
                })
            }
            Upsert::Put(participant) => participant,
        };

        let mut partition = self.mirror.participants_of(&key.test_id);
        match partition
            .iter_mut()
            .find(|p| p.session_id == key.session_id)
        {
            Some(slot) => *slot = participant.clone(),
            None => partition.push(participant.clone()),
        }
        self.persist_partition(&key.test_id, &partition).await?;

        Ok(self
            .mirror
            .upsert(key, Box::new(move |_| Upsert::Put(participant))))
    }

    async fn list_participants(&self, test_id: &TestId) -> Result<Vec<Participant>, StorageError> {
        Ok(self.mirror.participants_of(test_id))
    }

    async fn remove_participants(
        &self,
        test_id: &TestId,
        filter: ParticipantFilter<'_>,
    ) -> Result<usize, StorageError> {
        let lock = self.partition_lock(test_id);
        let _guard = lock.lock().await;

        let (removed, kept): (Vec<Participant>, Vec<Participant>) = self
            .mirror
            .participants_of(test_id)
            .into_iter()
            .partition(|p| filter(p));
        if removed.is_empty() {
            return Ok(0);
        }
        self.persist_partition(test_id, &kept).await?;

        Ok(self.mirror.remove_matching(test_id, filter))
    }
}
