//! Attempt orchestrator.
//!
//! Gates the attempt on exam status, loads the question set, then drives an
//! [`ExamSession`] from a single `select!` loop over input events, the engine
//! tick and connectivity changes published by a background check. When the
//! session finishes, every countdown is already cancelled; the result is
//! delivered, queued violation reports are flushed and local state cleared.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::emitter::{OfflineQueue, ViolationEmitter};
use crate::error::ProctorError;
use crate::loader::load_question_set;
use crate::model::{ExamStatus, Identity, SubmissionPayload, TerminalReason, ViolationRecord};
use crate::observer::SessionObserver;
use crate::persistence::{AttemptMarkers, SnapshotRepository, StorageKeys, StoreSnapshotRepository};
use crate::session::{ExamEvent, ExamSession, SessionContext, SessionEvent};
use crate::submission::{RetryPolicy, SubmissionPipeline};
use crate::tamper::TamperDetector;
use crate::traits::{
    AlwaysOnline, Clock, Connectivity, ExamSource, KeyValueStore, ResultSink, SystemClock,
    ViolationSink,
};

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub attempt_id: Uuid,
    pub reason: TerminalReason,
    /// The delivered result; `None` for aborted attempts.
    pub payload: Option<SubmissionPayload>,
    /// Delivery attempts made by the submission pipeline.
    pub delivery_attempts: u32,
    pub violations: Vec<ViolationRecord>,
}

/// Runs attempts against one set of collaborators.
pub struct AttemptRunner {
    source: Arc<dyn ExamSource>,
    results: Arc<dyn ResultSink>,
    violations: Arc<dyn ViolationSink>,
    connectivity: Arc<dyn Connectivity>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    seed: Option<u64>,
}

impl AttemptRunner {
    pub fn new(
        source: Arc<dyn ExamSource>,
        results: Arc<dyn ResultSink>,
        violations: Arc<dyn ViolationSink>,
        store: Arc<dyn KeyValueStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            results,
            violations,
            connectivity: Arc::new(AlwaysOnline),
            store,
            clock: Arc::new(SystemClock),
            config,
            seed: None,
        }
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Pin the question shuffle.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one attempt to completion.
    ///
    /// Events are read from `events` until the session finishes; a closed
    /// channel aborts the attempt.
    pub async fn run(
        &self,
        exam_id: &str,
        identity: &Identity,
        mut events: mpsc::Receiver<ExamEvent>,
        observer: &dyn SessionObserver,
    ) -> Result<AttemptOutcome, ProctorError> {
        let keys = StorageKeys::new(exam_id, &identity.student_id);
        let markers = AttemptMarkers::new(Arc::clone(&self.store), keys.clone());
        let pipeline = SubmissionPipeline::new(
            Arc::clone(&self.results),
            Arc::clone(&self.connectivity),
            markers.clone(),
            Arc::clone(&self.clock),
            RetryPolicy::from_config(&self.config),
        );
        let emitter = ViolationEmitter::new(
            Arc::clone(&self.violations),
            Arc::clone(&self.connectivity),
            OfflineQueue::new(Arc::clone(&self.store), keys.offline_queue()),
            Arc::clone(&self.clock),
        );

        if markers
            .submitted()
            .context("failed to read submission marker")?
            .is_some()
        {
            self.drain_offline_reports(&emitter).await;
            return Err(ProctorError::AlreadySubmitted {
                exam_id: exam_id.to_string(),
            });
        }

        // A result built before a crash is delivered before anything else.
        if let Some(payload) = markers
            .pending_result()
            .context("failed to read pending result")?
        {
            tracing::info!(exam_id, attempt_id = %payload.attempt_id, "delivering pending result");
            let delivery_attempts = pipeline.deliver(&payload, observer).await;
            self.clear_finished_state(&markers, &keys);
            self.drain_offline_reports(&emitter).await;
            let outcome = AttemptOutcome {
                attempt_id: payload.attempt_id,
                reason: payload.reason,
                payload: Some(payload),
                delivery_attempts,
                violations: Vec::new(),
            };
            observer.on_finished(&outcome);
            return Ok(outcome);
        }

        let status = self
            .source
            .exam_status(exam_id)
            .await
            .map_err(|source| ProctorError::StatusUnavailable {
                exam_id: exam_id.to_string(),
                source,
            })?;
        if status != ExamStatus::Active {
            return Err(ProctorError::ExamNotActive {
                exam_id: exam_id.to_string(),
                status,
            });
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let questions = load_question_set(
            self.source.as_ref(),
            exam_id,
            self.config.default_question_timeout_secs,
            &mut rng,
        )
        .await?;

        let snapshots: Arc<dyn SnapshotRepository> =
            Arc::new(StoreSnapshotRepository::new(Arc::clone(&self.store), &keys));
        let ctx = SessionContext {
            exam_id: exam_id.to_string(),
            identity: identity.clone(),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            snapshots: Arc::clone(&snapshots),
            tamper: TamperDetector::new(Arc::clone(&self.store), keys.violation_checksum()),
        };

        let mut session = match markers.in_progress().context("failed to read attempt marker")? {
            Some(previous) => {
                tracing::warn!(exam_id, %previous, "unfinished attempt found, treating as reload");
                let snapshot = snapshots.load().unwrap_or_else(|e| {
                    tracing::warn!("failed to load runtime snapshot: {e:#}");
                    None
                });
                ExamSession::reloaded(ctx, questions, snapshot)
            }
            None => ExamSession::start(ctx, questions),
        };
        markers
            .mark_in_progress(session.attempt_id())
            .context("failed to persist attempt marker")?;

        let online = self.connectivity.is_online().await;
        if online {
            emitter.flush();
        }
        dispatch(session.drain_events(), observer, &emitter);

        let (online_tx, mut online_rx) = watch::channel(online);
        let monitor = tokio::spawn(watch_connectivity(
            Arc::clone(&self.connectivity),
            self.config.offline_poll,
            online_tx,
        ));

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut last_tick = Instant::now();

        while !session.is_finished() {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(rejected) = session.handle(event) {
                            tracing::debug!("action rejected: {rejected}");
                        }
                    }
                    None => {
                        tracing::warn!(exam_id, "event source closed, aborting attempt");
                        let _ = session.handle(ExamEvent::Abort);
                    }
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    session.tick(now - last_tick);
                    last_tick = now;
                }
                Ok(()) = online_rx.changed() => {
                    if *online_rx.borrow_and_update() {
                        tracing::info!("connectivity restored, flushing offline violations");
                        emitter.flush();
                    }
                }
            }
            dispatch(session.drain_events(), observer, &emitter);
        }
        monitor.abort();

        let reason = session
            .terminal_reason()
            .unwrap_or(TerminalReason::Aborted);
        if let Err(e) = markers.persist_terminal_reason(&reason) {
            tracing::warn!("failed to persist terminal reason: {e:#}");
        }
        if let Err(e) = snapshots.clear() {
            tracing::warn!("failed to clear runtime snapshot: {e:#}");
        }

        let payload = session.payload();
        let mut delivery_attempts = 0;
        if let Some(payload) = &payload {
            if let Err(e) = markers.save_pending_result(payload) {
                tracing::warn!("failed to persist pending result: {e:#}");
            }
            delivery_attempts = pipeline.deliver(payload, observer).await;
        }
        self.clear_finished_state(&markers, &keys);
        self.drain_offline_reports(&emitter).await;

        let outcome = AttemptOutcome {
            attempt_id: session.attempt_id(),
            reason,
            payload,
            delivery_attempts,
            violations: session.ledger().records().to_vec(),
        };
        observer.on_finished(&outcome);
        Ok(outcome)
    }

    /// Wait for in-flight reports, then deliver whatever the offline queue
    /// still holds if the connection is up.
    async fn drain_offline_reports(&self, emitter: &ViolationEmitter) {
        emitter.settle().await;
        if emitter.queue().is_empty() || !self.connectivity.is_online().await {
            return;
        }
        emitter.flush();
        emitter.settle().await;
    }

    fn clear_finished_state(&self, markers: &AttemptMarkers, keys: &StorageKeys) {
        if let Err(e) = markers.clear_pending_result() {
            tracing::warn!("failed to clear pending result: {e:#}");
        }
        if let Err(e) = markers.clear_in_progress() {
            tracing::warn!("failed to clear attempt marker: {e:#}");
        }
        if let Err(e) = self.store.remove(&keys.violation_checksum()) {
            tracing::warn!("failed to clear violation checksum: {e:#}");
        }
    }
}

/// Poll `connectivity` every `period` and publish changes. Runs off the
/// session loop so a slow check never delays events or ticks.
async fn watch_connectivity(
    connectivity: Arc<dyn Connectivity>,
    period: Duration,
    online: watch::Sender<bool>,
) {
    let mut poll = tokio::time::interval(period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll.tick().await;
    while !online.is_closed() {
        poll.tick().await;
        let now_online = connectivity.is_online().await;
        online.send_if_modified(|current| {
            let changed = *current != now_online;
            *current = now_online;
            changed
        });
    }
}

fn dispatch(events: Vec<SessionEvent>, observer: &dyn SessionObserver, emitter: &ViolationEmitter) {
    for event in events {
        match event {
            SessionEvent::Render(view) => observer.on_question(&view),
            SessionEvent::Timer {
                question_secs,
                global_secs,
            } => observer.on_timer(question_secs, global_secs),
            SessionEvent::ReviewStarted(pending) => observer.on_review_started(pending),
            SessionEvent::Violation { record, report } => {
                observer.on_violation(&record, report.severity);
                emitter.emit(report);
            }
            SessionEvent::Warning(warning) => observer.on_warning(&warning),
            SessionEvent::WarningCleared { request_fullscreen } => {
                observer.on_warning_cleared(request_fullscreen)
            }
            SessionEvent::ResumePrompt => observer.on_resume_prompt(),
            SessionEvent::Finished(_) => {}
        }
    }
}
