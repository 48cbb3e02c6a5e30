//! The per-attempt state machine.
//!
//! `ExamSession` ties the sequencer, timers, integrity monitor, ledger and
//! snapshot repository together. It performs no I/O besides snapshot and
//! checksum writes: every effect the outside world has to act on (render,
//! report, finish) is queued as a [`SessionEvent`] and drained by the runner.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::ActionRejected;
use crate::integrity::{Detection, Escalation, InputSignal, IntegrityMonitor};
use crate::ledger::ViolationLedger;
use crate::loader::{normalize_code, QuestionSet};
use crate::model::{
    Identity, Phase, QuestionView, Severity, SubmissionPayload, TerminalReason, ViolationKind,
    ViolationRecord, ViolationReport,
};
use crate::observer::WarningView;
use crate::persistence::{SessionSnapshot, SnapshotRepository};
use crate::sequencing::{Advance, Sequencer};
use crate::submission::build_payload;
use crate::tamper::TamperDetector;
use crate::timer::{Countdown, TimerSet};
use crate::traits::Clock;

/// Something the student did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum UserAction {
    Submit(String),
    Draft(String),
    Skip,
    Requeue(String),
    ContinueAfterWarning,
    ExitDuringWarning,
}

/// Input accepted by a running attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamEvent {
    Signal(InputSignal),
    Action(UserAction),
    /// External abort; nothing is submitted.
    Abort,
}

/// Effects produced by the session, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Render(QuestionView),
    Timer {
        question_secs: Option<u64>,
        global_secs: Option<u64>,
    },
    ReviewStarted(usize),
    Violation {
        record: ViolationRecord,
        report: ViolationReport,
    },
    Warning(WarningView),
    WarningCleared {
        request_fullscreen: bool,
    },
    ResumePrompt,
    Finished(TerminalReason),
}

/// Collaborators and identity for one attempt.
#[derive(Clone)]
pub struct SessionContext {
    pub exam_id: String,
    pub identity: Identity,
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub tamper: TamperDetector,
}

/// Resume state held between a detected reload and its acknowledgment.
#[derive(Debug, Clone)]
struct PendingResume {
    /// The snapshot matched the loaded question set and was restored.
    resumable: bool,
    global_remaining_secs: Option<u64>,
}

pub struct ExamSession {
    ctx: SessionContext,
    questions: QuestionSet,
    attempt_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    sequencer: Sequencer,
    timers: TimerSet,
    monitor: IntegrityMonitor,
    ledger: ViolationLedger,
    review_grace: Option<Countdown>,
    tamper_check: Countdown,
    pending_resume: Option<PendingResume>,
    warning_description: String,
    finished: Option<TerminalReason>,
    events: Vec<SessionEvent>,
}

impl ExamSession {
    fn new(ctx: SessionContext, questions: QuestionSet) -> Self {
        let now = ctx.clock.now();
        Self {
            sequencer: Sequencer::new(&questions),
            monitor: IntegrityMonitor::new(&ctx.config),
            tamper_check: Countdown::new(ctx.config.tamper_check_interval),
            ctx,
            questions,
            attempt_id: Uuid::new_v4(),
            started_at: now,
            ended_at: None,
            timers: TimerSet::new(),
            ledger: ViolationLedger::new(),
            review_grace: None,
            pending_resume: None,
            warning_description: String::new(),
            finished: None,
            events: Vec::new(),
        }
    }

    /// Begin a fresh attempt: start the global timer and show the first question.
    pub fn start(ctx: SessionContext, questions: QuestionSet) -> Self {
        let mut session = Self::new(ctx, questions);
        if let Some(secs) = session.questions.global_timeout_secs() {
            session.timers.start_global(secs);
        }
        tracing::info!(
            exam_id = %session.ctx.exam_id,
            attempt_id = %session.attempt_id,
            questions = session.questions.denominator(),
            "attempt started"
        );
        session.render_current();
        session
    }

    /// Re-enter an attempt whose in-progress marker survived a reload.
    ///
    /// The reload itself is recorded as a violation. Nothing runs until the
    /// student acknowledges it with [`UserAction::ContinueAfterWarning`]; the
    /// attempt then resumes from `snapshot` if it was taken over the same
    /// question set, otherwise it is aborted.
    pub fn reloaded(
        ctx: SessionContext,
        questions: QuestionSet,
        snapshot: Option<SessionSnapshot>,
    ) -> Self {
        let mut session = Self::new(ctx, questions);
        let mut pending = PendingResume {
            resumable: false,
            global_remaining_secs: None,
        };

        match snapshot {
            Some(snap) if snap.matches(&session.questions) => {
                session.attempt_id = snap.attempt_id;
                session.started_at = snap.started_at;
                session.sequencer = snap.sequencer;
                session.ledger = ViolationLedger::restore(snap.ledger);
                session.monitor = session.monitor.with_count(snap.violation_count);
                pending.resumable = true;
                pending.global_remaining_secs = snap.global_remaining_secs;
            }
            Some(_) => {
                tracing::warn!("snapshot does not match the loaded question set");
                session.ctx.tamper.clear();
            }
            None => tracing::warn!("in-progress attempt has no usable snapshot"),
        }

        session.pending_resume = Some(pending);
        let escalation = session.monitor.escalate(Detection::new(
            ViolationKind::PageReload,
            "Page reloaded during the exam",
        ));
        session.apply(escalation);
        if session.finished.is_none() {
            session.events.push(SessionEvent::ResumePrompt);
        }
        session
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn questions(&self) -> &QuestionSet {
        &self.questions
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn ledger(&self) -> &ViolationLedger {
        &self.ledger
    }

    pub fn violation_count(&self) -> u32 {
        self.monitor.count()
    }

    pub fn is_frozen(&self) -> bool {
        self.monitor.is_frozen()
    }

    pub fn is_awaiting_resume(&self) -> bool {
        self.pending_resume.is_some()
    }

    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Take every effect queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn handle(&mut self, event: ExamEvent) -> Result<(), ActionRejected> {
        match event {
            ExamEvent::Signal(signal) => {
                self.signal(&signal);
                Ok(())
            }
            ExamEvent::Action(action) => self.act(action),
            ExamEvent::Abort => {
                self.finish(TerminalReason::Aborted);
                Ok(())
            }
        }
    }

    /// Feed a raw input signal through the integrity monitor.
    pub fn signal(&mut self, signal: &InputSignal) {
        if self.is_finished() || self.is_awaiting_resume() {
            return;
        }
        let escalation = self.monitor.observe(signal);
        self.apply(escalation);
    }

    pub fn act(&mut self, action: UserAction) -> Result<(), ActionRejected> {
        if self.is_finished() {
            return Err(ActionRejected::Inactive);
        }
        self.monitor.note_activity();

        if self.pending_resume.is_some() {
            return match action {
                UserAction::ContinueAfterWarning => {
                    self.resume();
                    Ok(())
                }
                UserAction::ExitDuringWarning => {
                    self.finish(TerminalReason::StudentExit);
                    Ok(())
                }
                _ => Err(ActionRejected::Frozen),
            };
        }

        if self.monitor.is_frozen() {
            return match action {
                UserAction::ContinueAfterWarning => {
                    let lifted = self.monitor.continue_after_warning()?;
                    self.events.push(SessionEvent::WarningCleared {
                        request_fullscreen: lifted.request_fullscreen,
                    });
                    Ok(())
                }
                UserAction::ExitDuringWarning => {
                    self.finish(TerminalReason::StudentExit);
                    Ok(())
                }
                _ => Err(ActionRejected::Frozen),
            };
        }

        match action {
            UserAction::Submit(answer) => {
                let advance = self.sequencer.submit(&answer)?;
                self.after(advance);
            }
            UserAction::Draft(text) => {
                self.sequencer.set_draft(&text)?;
                self.persist();
            }
            UserAction::Skip => {
                let remaining = self.current_remaining_secs();
                let advance = self.sequencer.skip(remaining)?;
                self.after(advance);
            }
            UserAction::Requeue(code) => {
                let remaining = self.current_remaining_secs();
                let advance = self
                    .sequencer
                    .requeue_now(&normalize_code(&code), remaining)?;
                self.after(advance);
            }
            UserAction::ContinueAfterWarning | UserAction::ExitDuringWarning => {
                return Err(ActionRejected::NoWarning);
            }
        }
        Ok(())
    }

    /// Advance every countdown by `elapsed`.
    pub fn tick(&mut self, elapsed: Duration) {
        if self.is_finished() || self.is_awaiting_resume() {
            return;
        }

        let timers = self.timers.tick(elapsed);
        if timers.global_expired {
            self.finish(TerminalReason::TimeExpired);
            return;
        }

        let monitor = self.monitor.tick(elapsed);
        if let Some(lifted) = monitor.lifted {
            self.events.push(SessionEvent::WarningCleared {
                request_fullscreen: lifted.request_fullscreen,
            });
        } else if monitor.countdown_changed {
            if let Some(view) = self.warning_view() {
                self.events.push(SessionEvent::Warning(view));
            }
        }
        if let Some(escalation) = monitor.inactivity {
            self.apply(escalation);
            if self.is_finished() {
                return;
            }
        }

        if let Some(grace) = self.review_grace.as_mut() {
            if grace.advance(elapsed) {
                self.review_grace = None;
                match self.sequencer.begin_review() {
                    Ok(advance) => {
                        let pending = self.sequencer.active().len();
                        self.events.push(SessionEvent::ReviewStarted(pending));
                        self.after(advance);
                    }
                    Err(e) => tracing::warn!("review could not start: {e}"),
                }
            }
        } else if timers.question_expired {
            match self.sequencer.expire_current() {
                Ok(advance) => self.after(advance),
                Err(e) => tracing::debug!("question timer expired with nothing displayed: {e}"),
            }
        }
        if self.is_finished() {
            return;
        }

        if self.tamper_check.advance(elapsed) {
            self.tamper_check = Countdown::new(self.ctx.config.tamper_check_interval);
            if let Some(record) = self.ledger.verify(&self.ctx.tamper, self.ctx.clock.now()) {
                self.push_violation(record, Severity::High);
                self.persist();
            }
        }

        if timers.second_boundary {
            self.events.push(SessionEvent::Timer {
                question_secs: self.timers.question_remaining_secs(),
                global_secs: self.timers.global_remaining_secs(),
            });
            self.persist();
        }
    }

    /// The payload to deliver, once finished with a reason that needs one.
    pub fn payload(&self) -> Option<SubmissionPayload> {
        let reason = self.finished?;
        if !reason.requires_submission() {
            return None;
        }
        Some(build_payload(
            self.attempt_id,
            &self.ctx.exam_id,
            &self.ctx.identity,
            self.sequencer.grade(&self.questions.answer_key()),
            self.started_at,
            self.ended_at.unwrap_or_else(|| self.ctx.clock.now()),
            reason,
        ))
    }

    /// Current state as a durable snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut sequencer = self.sequencer.clone();
        if let Some(secs) = self.timers.question_remaining_secs() {
            sequencer.save_current_remaining(secs);
        }
        SessionSnapshot {
            attempt_id: self.attempt_id,
            exam_id: self.ctx.exam_id.clone(),
            fingerprint: self.questions.fingerprint(),
            sequencer,
            global_remaining_secs: self.timers.global_remaining_secs(),
            ledger: self.ledger.records().to_vec(),
            violation_count: self.monitor.count(),
            started_at: self.started_at,
            saved_at: self.ctx.clock.now(),
        }
    }

    fn persist(&self) {
        if self.is_finished() || self.is_awaiting_resume() {
            return;
        }
        if let Err(e) = self.ctx.snapshots.save(&self.snapshot()) {
            tracing::warn!("failed to save runtime snapshot: {e:#}");
        }
    }

    fn resume(&mut self) {
        let Some(pending) = self.pending_resume.take() else {
            return;
        };
        let _ = self.monitor.continue_after_warning();
        if !pending.resumable {
            self.finish(TerminalReason::Aborted);
            return;
        }

        tracing::info!(attempt_id = %self.attempt_id, "attempt resumed after reload");
        self.events.push(SessionEvent::WarningCleared {
            request_fullscreen: true,
        });
        if let Some(secs) = pending.global_remaining_secs {
            self.timers.start_global(secs.max(1));
        }
        if self.sequencer.is_review_pending() {
            self.review_grace = Some(Countdown::new(self.ctx.config.review_grace));
            self.persist();
        } else if self.sequencer.is_done() {
            self.finish(TerminalReason::Completed);
        } else {
            self.render_current();
        }
    }

    fn after(&mut self, advance: Advance) {
        match advance {
            Advance::Render => self.render_current(),
            Advance::ReviewPending => {
                self.timers.cancel_question();
                self.review_grace = Some(Countdown::new(self.ctx.config.review_grace));
                self.persist();
            }
            Advance::Done => self.finish(TerminalReason::Completed),
        }
    }

    fn current_remaining_secs(&self) -> u64 {
        self.timers
            .question_remaining_secs()
            .unwrap_or(self.questions.default_timeout_secs())
            .max(1)
    }

    fn render_current(&mut self) {
        let Some(slot) = self.sequencer.current() else {
            return;
        };
        let Some(question) = self.questions.get(&slot.code) else {
            tracing::warn!(code = %slot.code, "active list references an unknown question");
            return;
        };

        let remaining_secs = slot.resume_secs.unwrap_or(question.timeout_secs).max(1);
        let phase = self.sequencer.phase();
        let view = QuestionView {
            code: question.code.clone(),
            prompt: question.prompt.clone(),
            ordinal: match phase {
                Phase::Primary => self.questions.ordinal(&question.code),
                _ => None,
            },
            phase,
            remaining_secs,
            progress: self.sequencer.progress(),
            skipped_pending: self.sequencer.skip_queue().len(),
            can_skip: phase == Phase::Primary,
        };

        self.timers.start_question(remaining_secs);
        self.events.push(SessionEvent::Render(view));
        self.persist();
    }

    fn apply(&mut self, escalation: Escalation) {
        match escalation {
            Escalation::None | Escalation::Suppressed(_) => {}
            Escalation::Warn {
                detection, count, ..
            } => {
                self.warning_description = detection.description.clone();
                self.record(&detection, count);
                if let Some(view) = self.warning_view() {
                    self.events.push(SessionEvent::Warning(view));
                }
                self.persist();
            }
            Escalation::Terminate { detection, count } => {
                self.record(&detection, count);
                self.finish(TerminalReason::ViolationLimit {
                    kind: detection.kind,
                });
            }
        }
    }

    fn record(&mut self, detection: &Detection, count: u32) {
        let added = self
            .ledger
            .append(&self.ctx.tamper, detection, self.ctx.clock.now());
        for record in added {
            let severity = if record.kind == ViolationKind::ViolationTampering {
                Severity::High
            } else {
                Severity::for_count(count)
            };
            self.push_violation(record, severity);
        }
    }

    fn push_violation(&mut self, record: ViolationRecord, severity: Severity) {
        let report = ViolationReport {
            student_id: self.ctx.identity.student_id.clone(),
            student_name: self.ctx.identity.display_name(),
            exam_id: self.ctx.exam_id.clone(),
            violation_type: record.kind,
            description: record.description.clone(),
            severity,
            timestamp: record.timestamp,
        };
        self.events.push(SessionEvent::Violation { record, report });
    }

    fn warning_view(&self) -> Option<WarningView> {
        let warning = self.monitor.warning()?;
        Some(WarningView {
            description: self.warning_description.clone(),
            count: warning.count,
            remaining_violations: warning.remaining_violations,
            remaining_secs: warning.remaining_secs(),
        })
    }

    fn finish(&mut self, reason: TerminalReason) {
        if self.finished.is_some() {
            return;
        }
        self.timers.cancel_all();
        self.monitor.deactivate();
        self.review_grace = None;
        self.pending_resume = None;
        self.sequencer.finish();
        self.finished = Some(reason);
        self.ended_at = Some(self.ctx.clock.now());
        tracing::info!(
            exam_id = %self.ctx.exam_id,
            attempt_id = %self.attempt_id,
            %reason,
            "attempt finished"
        );
        self.events.push(SessionEvent::Finished(reason));
    }
}
