//! Port definitions for the collaborators the engine talks to.
//!
//! The network ports are implemented by `proctor-transport`; the clock,
//! connectivity flag and in-memory store here are enough to run the engine
//! in tests or embedded without any I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TransportError;
use crate::model::{ExamConfig, ExamStatus, SubmissionPayload, ViolationReport};

// ---------------------------------------------------------------------------
// Network ports
// ---------------------------------------------------------------------------

/// Source of exam configuration and exam lifecycle status.
#[async_trait]
pub trait ExamSource: Send + Sync {
    /// Human-readable source name (e.g. "http", "file").
    fn name(&self) -> &str;

    /// Fetch the question bank and timer settings for one exam.
    async fn fetch_exam_config(&self, exam_id: &str) -> Result<ExamConfig, TransportError>;

    /// Query whether the exam is open for attempts.
    async fn exam_status(&self, exam_id: &str) -> Result<ExamStatus, TransportError>;
}

/// Violation-intake endpoint. Best-effort: any acknowledgment is enough.
#[async_trait]
pub trait ViolationSink: Send + Sync {
    async fn report_violation(&self, report: &ViolationReport) -> Result<(), TransportError>;
}

/// Result-submission endpoint. The engine retries this until it succeeds.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn submit_result(&self, payload: &SubmissionPayload) -> Result<(), TransportError>;
}

/// Reports whether the network is currently reachable.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Connectivity that never goes offline.
pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// A shared online/offline switch, flipped by whoever observes the network.
#[derive(Clone)]
pub struct ConnectivityFlag {
    online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for ConnectivityFlag {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Durable local storage
// ---------------------------------------------------------------------------

/// Durable string key/value storage, the engine's equivalent of browser
/// local storage. Single writer per attempt, last write wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Volatile store, useful for tests and for embedding without persistence.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall-clock source for record and payload timestamps.
///
/// Elapsed time (countdowns, lock windows) never comes from here; it is
/// driven by ticks so that paused-time tests stay deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real UTC clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a fixed instant, advanced by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn connectivity_flag_is_shared() {
        let flag = ConnectivityFlag::new(true);
        let observer = flag.clone();
        flag.set_online(false);
        assert!(!observer.is_online().await);
    }

    #[test]
    fn manual_clock_advances() {
        let start = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);
    }
}
