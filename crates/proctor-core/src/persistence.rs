//! Durable session state: runtime snapshots and attempt markers.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::loader::QuestionSet;
use crate::model::{SubmissionPayload, TerminalReason, ViolationRecord};
use crate::sequencing::Sequencer;
use crate::traits::KeyValueStore;

/// Storage keys for one identity/exam pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    prefix: String,
}

impl StorageKeys {
    pub fn new(exam_id: &str, student_id: &str) -> Self {
        Self {
            prefix: format!("proctor/{exam_id}/{student_id}"),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix)
    }

    pub fn snapshot(&self) -> String {
        self.key("runtime_snapshot")
    }

    pub fn in_progress(&self) -> String {
        self.key("in_progress")
    }

    pub fn submitted(&self) -> String {
        self.key("submission_status")
    }

    pub fn terminal_reason(&self) -> String {
        self.key("terminal_reason")
    }

    pub fn offline_queue(&self) -> String {
        self.key("offline_queue")
    }

    pub fn violation_checksum(&self) -> String {
        self.key("violation_checksum")
    }

    pub fn pending_result(&self) -> String {
        self.key("pending_result")
    }
}

/// Everything needed to resume an attempt after a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub attempt_id: Uuid,
    pub exam_id: String,
    /// Sorted question codes of the set the attempt was started with.
    pub fingerprint: Vec<String>,
    pub sequencer: Sequencer,
    pub global_remaining_secs: Option<u64>,
    pub ledger: Vec<ViolationRecord>,
    pub violation_count: u32,
    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// True if `set` holds the same questions the snapshot was taken over.
    pub fn matches(&self, set: &QuestionSet) -> bool {
        self.fingerprint == set.fingerprint()
    }
}

/// Load/save/clear access to the current snapshot.
pub trait SnapshotRepository: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<SessionSnapshot>>;
    fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// Snapshot repository over a key/value store, one JSON document per key.
#[derive(Clone)]
pub struct StoreSnapshotRepository {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl StoreSnapshotRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: &StorageKeys) -> Self {
        Self {
            store,
            key: keys.snapshot(),
        }
    }
}

impl SnapshotRepository for StoreSnapshotRepository {
    fn load(&self) -> anyhow::Result<Option<SessionSnapshot>> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_str(&raw).context("corrupt runtime snapshot")?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        let raw = serde_json::to_string(snapshot)?;
        self.store.set(&self.key, &raw)
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.store.remove(&self.key)
    }
}

/// The submitted marker, written only after an acknowledged delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedMarker {
    pub attempt_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}

/// In-progress, submitted and terminal-reason markers.
#[derive(Clone)]
pub struct AttemptMarkers {
    store: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
}

impl AttemptMarkers {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StorageKeys) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub fn mark_in_progress(&self, attempt_id: Uuid) -> anyhow::Result<()> {
        self.store
            .set(&self.keys.in_progress(), &attempt_id.to_string())
    }

    /// Attempt id of an attempt that never finished, if any.
    pub fn in_progress(&self) -> anyhow::Result<Option<Uuid>> {
        Ok(self
            .store
            .get(&self.keys.in_progress())?
            .and_then(|raw| raw.parse().ok()))
    }

    pub fn clear_in_progress(&self) -> anyhow::Result<()> {
        self.store.remove(&self.keys.in_progress())
    }

    pub fn mark_submitted(&self, marker: &SubmittedMarker) -> anyhow::Result<()> {
        self.store
            .set(&self.keys.submitted(), &serde_json::to_string(marker)?)
    }

    pub fn submitted(&self) -> anyhow::Result<Option<SubmittedMarker>> {
        let Some(raw) = self.store.get(&self.keys.submitted())? else {
            return Ok(None);
        };
        Ok(Some(
            serde_json::from_str(&raw).context("corrupt submission marker")?,
        ))
    }

    /// Keep a built payload until it is acknowledged, so a crash during
    /// delivery does not lose it.
    pub fn save_pending_result(&self, payload: &SubmissionPayload) -> anyhow::Result<()> {
        self.store
            .set(&self.keys.pending_result(), &serde_json::to_string(payload)?)
    }

    pub fn pending_result(&self) -> anyhow::Result<Option<SubmissionPayload>> {
        let Some(raw) = self.store.get(&self.keys.pending_result())? else {
            return Ok(None);
        };
        Ok(Some(
            serde_json::from_str(&raw).context("corrupt pending result")?,
        ))
    }

    pub fn clear_pending_result(&self) -> anyhow::Result<()> {
        self.store.remove(&self.keys.pending_result())
    }

    pub fn persist_terminal_reason(&self, reason: &TerminalReason) -> anyhow::Result<()> {
        self.store
            .set(&self.keys.terminal_reason(), &serde_json::to_string(reason)?)
    }

    pub fn terminal_reason(&self) -> anyhow::Result<Option<TerminalReason>> {
        let Some(raw) = self.store.get(&self.keys.terminal_reason())? else {
            return Ok(None);
        };
        Ok(Some(
            serde_json::from_str(&raw).context("corrupt terminal reason")?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ViolationKind;
    use crate::traits::MemoryStore;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            attempt_id: Uuid::new_v4(),
            exam_id: "EX1".into(),
            fingerprint: vec!["Q001".into(), "Q002".into()],
            sequencer: Sequencer::from_order(vec!["Q002".to_string(), "Q001".to_string()]),
            global_remaining_secs: Some(540),
            ledger: Vec::new(),
            violation_count: 1,
            started_at: Utc::now(),
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn keys_are_scoped_per_identity_and_exam() {
        let a = StorageKeys::new("EX1", "s1");
        let b = StorageKeys::new("EX1", "s2");
        assert_ne!(a.snapshot(), b.snapshot());
        assert!(a.offline_queue().starts_with("proctor/EX1/s1/"));
    }

    #[test]
    fn snapshot_save_load_clear() {
        let store = Arc::new(MemoryStore::new());
        let repo = StoreSnapshotRepository::new(store.clone(), &StorageKeys::new("EX1", "s1"));
        assert!(repo.load().unwrap().is_none());

        let snap = snapshot();
        repo.save(&snap).unwrap();
        assert_eq!(repo.load().unwrap(), Some(snap));

        repo.clear().unwrap();
        assert!(repo.load().unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let keys = StorageKeys::new("EX1", "s1");
        store.set(&keys.snapshot(), "{not json").unwrap();
        let repo = StoreSnapshotRepository::new(store, &keys);
        assert!(repo.load().is_err());
    }

    #[test]
    fn markers_roundtrip() {
        let markers = AttemptMarkers::new(Arc::new(MemoryStore::new()), StorageKeys::new("EX1", "s1"));
        let id = Uuid::new_v4();
        markers.mark_in_progress(id).unwrap();
        assert_eq!(markers.in_progress().unwrap(), Some(id));
        markers.clear_in_progress().unwrap();
        assert_eq!(markers.in_progress().unwrap(), None);

        let reason = TerminalReason::ViolationLimit {
            kind: ViolationKind::FullscreenExit,
        };
        markers.persist_terminal_reason(&reason).unwrap();
        assert_eq!(markers.terminal_reason().unwrap(), Some(reason));
        assert!(markers.submitted().unwrap().is_none());
    }
}
