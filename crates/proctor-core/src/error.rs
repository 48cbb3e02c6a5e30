//! Error types for the exam engine.
//!
//! Transport errors are defined here, not in `proctor-transport`, so the
//! engine can classify them (connectivity vs. server rejection) without
//! string matching.

use thiserror::Error;

use crate::model::ExamStatus;

/// Errors that can occur when talking to an exam collaborator over the network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request never reached the server.
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// The server answered with a non-success status.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The server answered 2xx but did not acknowledge the request.
    #[error("request not acknowledged: {0}")]
    Rejected(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns `true` if the failure happened before any server answered.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout(_))
    }
}

/// The exam configuration could not be loaded. Fatal to the attempt; the
/// caller may retry the whole load.
#[derive(Debug, Error)]
pub enum LoadFailure {
    /// The configuration fetch failed at the transport level.
    #[error("failed to fetch exam configuration for '{exam_id}': {source}")]
    Fetch {
        exam_id: String,
        #[source]
        source: TransportError,
    },

    /// The configuration was fetched but held no questions.
    #[error("exam '{exam_id}' has no questions")]
    Empty { exam_id: String },

    /// A question bank file could not be parsed.
    #[error("malformed question bank: {0}")]
    Malformed(String),
}

/// Errors that stop an attempt from starting or completing.
#[derive(Debug, Error)]
pub enum ProctorError {
    /// Loading the question set failed.
    #[error(transparent)]
    Load(#[from] LoadFailure),

    /// The exam-status gate refused the attempt.
    #[error("exam '{exam_id}' is not open for attempts (status: {status})")]
    ExamNotActive { exam_id: String, status: ExamStatus },

    /// The exam status could not be queried.
    #[error("failed to query status of exam '{exam_id}': {source}")]
    StatusUnavailable {
        exam_id: String,
        #[source]
        source: TransportError,
    },

    /// A result for this identity and exam was already acknowledged.
    #[error("a result for exam '{exam_id}' has already been submitted")]
    AlreadySubmitted { exam_id: String },

    /// Durable local storage failed.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A user action that the current session state does not allow.
///
/// These are expected during normal operation (a click while frozen, a skip
/// during review) and are never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionRejected {
    #[error("the attempt is no longer active")]
    Inactive,

    #[error("interaction is frozen by a violation warning")]
    Frozen,

    #[error("the review phase is about to begin")]
    Transitioning,

    #[error("skipping is not allowed during the review phase")]
    SkipInReview,

    #[error("question '{0}' is not in the skip queue")]
    NotSkipped(String),

    #[error("no question is currently displayed")]
    NoCurrentQuestion,

    #[error("no violation warning is displayed")]
    NoWarning,
}
