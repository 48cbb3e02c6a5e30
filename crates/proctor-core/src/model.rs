//! Core data model types for proctor.
//!
//! These are the types shared by every engine component and by the
//! transport adapters: questions, exam configuration, identities, violation
//! records and the final submission payload.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Answer recorded when a question is submitted blank or times out.
pub const BLANK_ANSWER: &str = "-";

/// A single loaded exam question. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Normalised question code (e.g. `Q007`).
    pub code: String,
    /// The prompt shown to the student.
    pub prompt: String,
    /// Expected answer, compared case-insensitively.
    pub correct_answer: String,
    /// Per-question countdown in seconds.
    pub timeout_secs: u64,
    /// True for entries synthesized to fill a gap or replace a malformed question.
    #[serde(default)]
    pub placeholder: bool,
}

/// A question as delivered by the exam-config collaborator, before normalisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestion {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, alias = "question")]
    pub prompt: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default, alias = "timerSeconds")]
    pub timeout_seconds: Option<u64>,
}

/// Exam configuration as returned by `fetch exam-config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamConfig {
    #[serde(default)]
    pub questions: Vec<RawQuestion>,
    #[serde(default, alias = "globalExamTimerSeconds")]
    pub global_timeout_seconds: Option<u64>,
    #[serde(default, alias = "defaultTimerSeconds")]
    pub default_per_question_timeout_seconds: Option<u64>,
}

/// Lifecycle status of an exam, as reported by the exam-status collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamStatus::Draft => write!(f, "draft"),
            ExamStatus::Active => write!(f, "active"),
            ExamStatus::Completed => write!(f, "completed"),
            ExamStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ExamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(ExamStatus::Draft),
            "active" => Ok(ExamStatus::Active),
            "completed" => Ok(ExamStatus::Completed),
            "cancelled" | "canceled" => Ok(ExamStatus::Cancelled),
            other => Err(format!("unknown exam status: {other}")),
        }
    }
}

/// The student taking the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
}

impl Identity {
    /// "First Last", as shown on proctor dashboards.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Traversal phase of the sequencing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Primary,
    Review,
    Done,
}

/// Closed vocabulary of rule violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    TabSwitch,
    WindowBlur,
    FullscreenExit,
    AltTab,
    KeyboardShortcut,
    CopyAttempt,
    PasteAttempt,
    CutAttempt,
    SelectAll,
    DevTools,
    RightClick,
    ScreenshotAttempt,
    ReloadAttempt,
    CloseAttempt,
    PageReload,
    BackNavigation,
    ScreenResize,
    ExternalScript,
    Inactivity,
    ViolationTampering,
}

impl ViolationKind {
    /// Wire name, e.g. `FULLSCREEN_EXIT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "TAB_SWITCH",
            ViolationKind::WindowBlur => "WINDOW_BLUR",
            ViolationKind::FullscreenExit => "FULLSCREEN_EXIT",
            ViolationKind::AltTab => "ALT_TAB",
            ViolationKind::KeyboardShortcut => "KEYBOARD_SHORTCUT",
            ViolationKind::CopyAttempt => "COPY_ATTEMPT",
            ViolationKind::PasteAttempt => "PASTE_ATTEMPT",
            ViolationKind::CutAttempt => "CUT_ATTEMPT",
            ViolationKind::SelectAll => "SELECT_ALL",
            ViolationKind::DevTools => "DEV_TOOLS",
            ViolationKind::RightClick => "RIGHT_CLICK",
            ViolationKind::ScreenshotAttempt => "SCREENSHOT_ATTEMPT",
            ViolationKind::ReloadAttempt => "RELOAD_ATTEMPT",
            ViolationKind::CloseAttempt => "CLOSE_ATTEMPT",
            ViolationKind::PageReload => "PAGE_RELOAD",
            ViolationKind::BackNavigation => "BACK_NAVIGATION",
            ViolationKind::ScreenResize => "SCREEN_RESIZE",
            ViolationKind::ExternalScript => "EXTERNAL_SCRIPT",
            ViolationKind::Inactivity => "INACTIVITY",
            ViolationKind::ViolationTampering => "VIOLATION_TAMPERING",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to a violation report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Severity for the n-th counted violation of an attempt.
    pub fn for_count(count: u32) -> Self {
        match count {
            0 | 1 => Severity::Low,
            2 => Severity::Medium,
            _ => Severity::High,
        }
    }
}

/// One entry of the local violation ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub kind: ViolationKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Strictly increasing within one attempt.
    pub sequence_number: u64,
}

/// Payload sent to the violation-intake collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReport {
    pub student_id: String,
    pub student_name: String,
    pub exam_id: String,
    pub violation_type: ViolationKind,
    pub description: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Why an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminalReason {
    /// Every question was answered (or timed out).
    Completed,
    /// The global exam timer reached zero.
    TimeExpired,
    /// The violation limit was reached; `kind` is the final violation.
    ViolationLimit { kind: ViolationKind },
    /// The student chose to exit while a violation warning was displayed.
    StudentExit,
    /// The attempt was aborted; nothing is submitted.
    Aborted,
}

impl TerminalReason {
    /// True if the attempt ended because of the student's behaviour.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            TerminalReason::ViolationLimit { .. } | TerminalReason::StudentExit
        )
    }

    /// True if a result must be delivered for this ending.
    pub fn requires_submission(&self) -> bool {
        !matches!(self, TerminalReason::Aborted)
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Completed => write!(f, "completed"),
            TerminalReason::TimeExpired => write!(f, "time expired"),
            TerminalReason::ViolationLimit { kind } => write!(f, "violation limit ({kind})"),
            TerminalReason::StudentExit => write!(f, "student exited during violation warning"),
            TerminalReason::Aborted => write!(f, "aborted"),
        }
    }
}

/// A code paired with the answer the student gave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradedAnswer {
    pub code: String,
    pub answer: String,
}

impl fmt::Display for GradedAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.answer)
    }
}

/// Correct answers over the locked question count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub correct: u32,
    pub total: u32,
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.correct, self.total)
    }
}

/// The final result delivered by the submission pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub attempt_id: Uuid,
    pub exam_id: String,
    pub identity: Identity,
    pub score: Score,
    pub correct_list: Vec<GradedAnswer>,
    pub mistake_list: Vec<GradedAnswer>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: TerminalReason,
    pub violated: bool,
}

/// Answered count against the denominator locked at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub answered: usize,
    pub total: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Questions {}/{}", self.answered, self.total)
    }
}

/// What the UI needs to render the current question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub code: String,
    pub prompt: String,
    /// 1-based position in the loaded order; `None` during review.
    pub ordinal: Option<usize>,
    pub phase: Phase,
    pub remaining_secs: u64,
    pub progress: Progress,
    /// Questions waiting in the skip queue.
    pub skipped_pending: usize,
    /// Skipping is offered only during the primary pass.
    pub can_skip: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_status_display_and_parse() {
        assert_eq!(ExamStatus::Active.to_string(), "active");
        assert_eq!("ACTIVE".parse::<ExamStatus>().unwrap(), ExamStatus::Active);
        assert_eq!(
            "canceled".parse::<ExamStatus>().unwrap(),
            ExamStatus::Cancelled
        );
        assert!("archived".parse::<ExamStatus>().is_err());
    }

    #[test]
    fn violation_kind_wire_name_matches_serde() {
        let json = serde_json::to_string(&ViolationKind::FullscreenExit).unwrap();
        assert_eq!(json, "\"FULLSCREEN_EXIT\"");
        assert_eq!(ViolationKind::FullscreenExit.as_str(), "FULLSCREEN_EXIT");
    }

    #[test]
    fn severity_escalates_with_count() {
        assert_eq!(Severity::for_count(1), Severity::Low);
        assert_eq!(Severity::for_count(2), Severity::Medium);
        assert_eq!(Severity::for_count(3), Severity::High);
    }

    #[test]
    fn terminal_reason_display() {
        assert_eq!(TerminalReason::TimeExpired.to_string(), "time expired");
        assert_eq!(
            TerminalReason::ViolationLimit {
                kind: ViolationKind::FullscreenExit
            }
            .to_string(),
            "violation limit (FULLSCREEN_EXIT)"
        );
        assert!(!TerminalReason::Aborted.requires_submission());
    }

    #[test]
    fn exam_config_accepts_legacy_field_names() {
        let json = r#"{
            "questions": [{"code": "1", "question": "2+2?", "answer": "4", "timerSeconds": 45}],
            "globalExamTimerSeconds": 600,
            "defaultTimerSeconds": 30
        }"#;
        let config: ExamConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.questions[0].prompt, "2+2?");
        assert_eq!(config.questions[0].timeout_seconds, Some(45));
        assert_eq!(config.global_timeout_seconds, Some(600));
        assert_eq!(config.default_per_question_timeout_seconds, Some(30));
    }
}
