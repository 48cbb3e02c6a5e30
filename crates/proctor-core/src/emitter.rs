//! Best-effort violation reporting.
//!
//! Reports are spawned and never awaited by the session loop. A report made
//! while offline is parked in a persisted FIFO queue and flushed when the
//! connection returns; a report that fails while online is dropped.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::model::ViolationReport;
use crate::traits::{Clock, Connectivity, KeyValueStore, ViolationSink};

/// A violation report waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueEntry {
    pub report: ViolationReport,
    pub enqueued_at: DateTime<Utc>,
}

/// Persisted FIFO of undelivered reports.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    guard: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn entries(&self) -> anyhow::Result<Vec<OfflineQueueEntry>> {
        match self.store.get(&self.key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, entries: &[OfflineQueueEntry]) -> anyhow::Result<()> {
        if entries.is_empty() {
            self.store.remove(&self.key)
        } else {
            self.store.set(&self.key, &serde_json::to_string(entries)?)
        }
    }

    pub fn push(&self, entry: OfflineQueueEntry) -> anyhow::Result<()> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| anyhow::anyhow!("offline queue poisoned"))?;
        let mut entries = self.entries()?;
        entries.push(entry);
        self.write(&entries)
    }

    /// Drop the oldest entry after it was delivered.
    fn pop_front(&self) -> anyhow::Result<()> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| anyhow::anyhow!("offline queue poisoned"))?;
        let mut entries = self.entries()?;
        if !entries.is_empty() {
            entries.remove(0);
        }
        self.write(&entries)
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One-way violation reporting capability.
#[derive(Clone)]
pub struct ViolationEmitter {
    inner: Arc<EmitterInner>,
}

struct EmitterInner {
    sink: Arc<dyn ViolationSink>,
    connectivity: Arc<dyn Connectivity>,
    queue: OfflineQueue,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<JoinSet<()>>,
    flushing: tokio::sync::Mutex<()>,
}

impl ViolationEmitter {
    pub fn new(
        sink: Arc<dyn ViolationSink>,
        connectivity: Arc<dyn Connectivity>,
        queue: OfflineQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                sink,
                connectivity,
                queue,
                clock,
                in_flight: Mutex::new(JoinSet::new()),
                flushing: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    /// Send `report` in the background. Never blocks the caller.
    pub fn emit(&self, report: ViolationReport) {
        let inner = Arc::clone(&self.inner);
        self.spawn(async move {
            if !inner.connectivity.is_online().await {
                let entry = OfflineQueueEntry {
                    report,
                    enqueued_at: inner.clock.now(),
                };
                match inner.queue.push(entry) {
                    Ok(()) => tracing::info!("offline, violation report queued"),
                    Err(e) => tracing::warn!("failed to queue violation report: {e:#}"),
                }
                return;
            }
            if let Err(e) = inner.sink.report_violation(&report).await {
                tracing::warn!(kind = %report.violation_type, "violation report dropped: {e}");
            }
        });
    }

    /// Flush the offline queue in the background. A flush already running
    /// makes this a no-op.
    pub fn flush(&self) {
        let inner = Arc::clone(&self.inner);
        self.spawn(async move {
            let Ok(_flushing) = inner.flushing.try_lock() else {
                return;
            };
            flush_queue(&inner).await;
        });
    }

    /// Wait for every spawned report to finish.
    pub async fn settle(&self) {
        let mut set = match self.inner.in_flight.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        while set.join_next().await.is_some() {}
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match self.inner.in_flight.lock() {
            Ok(mut set) => {
                while set.try_join_next().is_some() {}
                set.spawn(task);
            }
            Err(_) => {
                tokio::spawn(task);
            }
        }
    }
}

async fn flush_queue(inner: &EmitterInner) {
    let entries = match inner.queue.entries() {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("failed to read offline queue: {e:#}");
            return;
        }
    };
    if entries.is_empty() {
        return;
    }

    let total = entries.len();
    let mut delivered = 0usize;
    for entry in entries {
        if let Err(e) = inner.sink.report_violation(&entry.report).await {
            tracing::warn!(delivered, remaining = total - delivered, "offline queue flush stopped: {e}");
            return;
        }
        if let Err(e) = inner.queue.pop_front() {
            tracing::warn!("failed to update offline queue: {e:#}");
            return;
        }
        delivered += 1;
    }
    tracing::info!(delivered, "offline violation queue flushed");
}
