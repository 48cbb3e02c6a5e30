//! Mock backend for testing.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use proctor_core::error::TransportError;
use proctor_core::model::{ExamConfig, ExamStatus, SubmissionPayload, ViolationReport};
use proctor_core::traits::{Connectivity, ExamSource, ResultSink, ViolationSink};

/// An in-process backend for exercising the engine without a server.
///
/// Serves one fixed exam config and status, records every report and
/// result it receives, and can be scripted to fail result submissions or
/// to go offline.
pub struct MockBackend {
    config: Mutex<ExamConfig>,
    status: Mutex<ExamStatus>,
    /// Result submissions still to fail before one succeeds.
    failures_left: AtomicU32,
    online: AtomicBool,
    config_calls: AtomicU32,
    submit_calls: AtomicU32,
    reports: Mutex<Vec<ViolationReport>>,
    results: Mutex<Vec<SubmissionPayload>>,
}

impl MockBackend {
    pub fn new(config: ExamConfig) -> Self {
        Self {
            config: Mutex::new(config),
            status: Mutex::new(ExamStatus::Active),
            failures_left: AtomicU32::new(0),
            online: AtomicBool::new(true),
            config_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            reports: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn with_status(self, status: ExamStatus) -> Self {
        *self.status.lock().unwrap() = status;
        self
    }

    /// Fail the next `n` result submissions with a server error.
    pub fn fail_submissions(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_config(&self, config: ExamConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn config_calls(&self) -> u32 {
        self.config_calls.load(Ordering::SeqCst)
    }

    /// Every submission attempt, failed or not.
    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<ViolationReport> {
        self.reports.lock().unwrap().clone()
    }

    /// Acknowledged results, in delivery order.
    pub fn results(&self) -> Vec<SubmissionPayload> {
        self.results.lock().unwrap().clone()
    }

    fn offline_error(&self) -> Option<TransportError> {
        (!self.online.load(Ordering::SeqCst))
            .then(|| TransportError::Network("mock backend is offline".into()))
    }
}

#[async_trait]
impl ExamSource for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_exam_config(&self, _exam_id: &str) -> Result<ExamConfig, TransportError> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.offline_error() {
            return Err(e);
        }
        Ok(self.config.lock().unwrap().clone())
    }

    async fn exam_status(&self, _exam_id: &str) -> Result<ExamStatus, TransportError> {
        if let Some(e) = self.offline_error() {
            return Err(e);
        }
        Ok(*self.status.lock().unwrap())
    }
}

#[async_trait]
impl ViolationSink for MockBackend {
    async fn report_violation(&self, report: &ViolationReport) -> Result<(), TransportError> {
        if let Some(e) = self.offline_error() {
            return Err(e);
        }
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

#[async_trait]
impl ResultSink for MockBackend {
    async fn submit_result(&self, payload: &SubmissionPayload) -> Result<(), TransportError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.offline_error() {
            return Err(e);
        }
        let scripted_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(TransportError::Server {
                status: 503,
                message: "scripted failure".into(),
            });
        }
        self.results.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

#[async_trait]
impl Connectivity for MockBackend {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_core::model::RawQuestion;

    fn config() -> ExamConfig {
        ExamConfig {
            questions: vec![RawQuestion {
                code: Some("Q001".into()),
                prompt: "2 + 2?".into(),
                answer: Some("4".into()),
                timeout_seconds: None,
            }],
            global_timeout_seconds: None,
            default_per_question_timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn serves_config_and_counts_calls() {
        let backend = MockBackend::new(config()).with_status(ExamStatus::Draft);
        assert_eq!(backend.exam_status("X").await.unwrap(), ExamStatus::Draft);
        assert_eq!(backend.fetch_exam_config("X").await.unwrap().questions.len(), 1);
        assert_eq!(backend.config_calls(), 1);
    }

    #[tokio::test]
    async fn offline_fails_with_connectivity_error() {
        let backend = MockBackend::new(config());
        backend.set_online(false);
        assert!(!backend.is_online().await);
        let err = backend.fetch_exam_config("X").await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
