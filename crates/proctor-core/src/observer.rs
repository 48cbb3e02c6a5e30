//! Observer hooks for whatever renders the attempt.

use crate::model::{QuestionView, Severity, ViolationRecord};
use crate::runner::AttemptOutcome;
use crate::submission::SubmissionStatus;

/// A violation warning as it should be displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningView {
    pub description: String,
    pub count: u32,
    pub remaining_violations: u32,
    pub remaining_secs: u64,
}

/// Receives session progress. Every method has an empty default.
pub trait SessionObserver: Send + Sync {
    /// A question is displayed. Lifting a freeze does not re-send it; see
    /// [`SessionObserver::on_warning_cleared`].
    fn on_question(&self, _view: &QuestionView) {}
    /// Whole-second countdown values changed.
    fn on_timer(&self, _question_secs: Option<u64>, _global_secs: Option<u64>) {}
    /// The review phase is starting with `pending` questions.
    fn on_review_started(&self, _pending: usize) {}
    fn on_violation(&self, _record: &ViolationRecord, _severity: Severity) {}
    /// A freeze started or its countdown changed.
    fn on_warning(&self, _warning: &WarningView) {}
    fn on_warning_cleared(&self, _request_fullscreen: bool) {}
    /// A reload was detected; the attempt waits for an acknowledgment.
    fn on_resume_prompt(&self) {}
    fn on_submission_status(&self, _status: &SubmissionStatus) {}
    fn on_finished(&self, _outcome: &AttemptOutcome) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
