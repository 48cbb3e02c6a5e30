//! Structural tamper check for the violation ledger.
//!
//! The record count is persisted after every append. A ledger that later
//! comes back shorter than that count was edited outside the engine. This is
//! a cheap signal, not a cryptographic one.

use std::sync::Arc;

use crate::integrity::Detection;
use crate::model::ViolationKind;
use crate::traits::KeyValueStore;

/// A ledger shorter than its persisted checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TamperDetected {
    pub expected: usize,
    pub found: usize,
}

impl TamperDetected {
    pub fn to_detection(self) -> Detection {
        Detection::new(
            ViolationKind::ViolationTampering,
            format!(
                "Violation log tampering detected. Expected {} violations but found {}",
                self.expected, self.found
            ),
        )
    }
}

/// Persists and verifies the ledger checksum.
#[derive(Clone)]
pub struct TamperDetector {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl TamperDetector {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Persisted record count, if any.
    pub fn stored(&self) -> Option<usize> {
        match self.store.get(&self.key) {
            Ok(value) => value.and_then(|v| v.trim().parse().ok()),
            Err(e) => {
                tracing::warn!("failed to read violation checksum: {e:#}");
                None
            }
        }
    }

    /// Persist `len` as the new checksum.
    pub fn record(&self, len: usize) {
        if let Err(e) = self.store.set(&self.key, &len.to_string()) {
            tracing::warn!("failed to persist violation checksum: {e:#}");
        }
    }

    /// Compare the persisted checksum with the current ledger length.
    pub fn check(&self, ledger_len: usize) -> Option<TamperDetected> {
        let expected = self.stored()?;
        (expected > ledger_len).then(|| {
            tracing::warn!(expected, found = ledger_len, "violation ledger shrank");
            TamperDetected {
                expected,
                found: ledger_len,
            }
        })
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            tracing::warn!("failed to clear violation checksum: {e:#}");
        }
    }
}
