//! Ordered record of violations for one attempt.

use chrono::{DateTime, Utc};

use crate::integrity::Detection;
use crate::model::ViolationRecord;
use crate::tamper::TamperDetector;

/// Append-only violation list with strictly increasing sequence numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationLedger {
    records: Vec<ViolationRecord>,
    next_sequence: u64,
}

impl ViolationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records.
    pub fn restore(records: Vec<ViolationRecord>) -> Self {
        let next_sequence = records
            .iter()
            .map(|r| r.sequence_number + 1)
            .max()
            .unwrap_or(0);
        Self {
            records,
            next_sequence,
        }
    }

    pub fn records(&self) -> &[ViolationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, detection: &Detection, at: DateTime<Utc>) -> ViolationRecord {
        let record = ViolationRecord {
            kind: detection.kind,
            description: detection.description.clone(),
            timestamp: at,
            sequence_number: self.next_sequence,
        };
        self.next_sequence += 1;
        self.records.push(record.clone());
        record
    }

    /// Append `detection`, preceded by a tamper record if the ledger shrank
    /// since the last append. Returns every record added, in order.
    pub fn append(
        &mut self,
        detector: &TamperDetector,
        detection: &Detection,
        at: DateTime<Utc>,
    ) -> Vec<ViolationRecord> {
        let mut added = Vec::with_capacity(2);
        if let Some(found) = detector.check(self.len()) {
            added.push(self.push(&found.to_detection(), at));
        }
        added.push(self.push(detection, at));
        detector.record(self.len());
        added
    }

    /// Periodic check between incidents. Appends and returns the tamper
    /// record when the ledger shrank.
    pub fn verify(&mut self, detector: &TamperDetector, at: DateTime<Utc>) -> Option<ViolationRecord> {
        let found = detector.check(self.len())?;
        let record = self.push(&found.to_detection(), at);
        detector.record(self.len());
        Some(record)
    }
}
