//! Durable delivery of the final result.
//!
//! Delivery never gives up: a completed attempt's result is retried until
//! the result sink acknowledges it. Calls are strictly sequential.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::model::{Identity, SubmissionPayload, TerminalReason};
use crate::observer::SessionObserver;
use crate::persistence::{AttemptMarkers, SubmittedMarker};
use crate::sequencing::Grade;
use crate::traits::{Clock, Connectivity, ResultSink};

/// Fixed-interval retry with no ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after a failed delivery.
    pub retry_interval: Duration,
    /// Connectivity poll while offline.
    pub offline_poll: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            retry_interval: config.retry_interval,
            offline_poll: config.offline_poll,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Delivery state shown to the student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    WaitingForConnection,
    Submitting { attempt: u32 },
    Retrying { attempt: u32, error: String },
    Submitted { attempts: u32 },
}

/// Assemble the payload for a finished attempt.
pub fn build_payload(
    attempt_id: Uuid,
    exam_id: &str,
    identity: &Identity,
    grade: Grade,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    reason: TerminalReason,
) -> SubmissionPayload {
    SubmissionPayload {
        attempt_id,
        exam_id: exam_id.to_string(),
        identity: identity.clone(),
        score: grade.score,
        correct_list: grade.correct,
        mistake_list: grade.mistakes,
        start_time,
        end_time,
        violated: reason.is_violation(),
        reason,
    }
}

/// Sends the result and persists the submitted marker on acknowledgment.
pub struct SubmissionPipeline {
    sink: Arc<dyn ResultSink>,
    connectivity: Arc<dyn Connectivity>,
    markers: AttemptMarkers,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl SubmissionPipeline {
    pub fn new(
        sink: Arc<dyn ResultSink>,
        connectivity: Arc<dyn Connectivity>,
        markers: AttemptMarkers,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            connectivity,
            markers,
            clock,
            policy,
        }
    }

    /// Deliver `payload`, returning the number of delivery attempts made.
    pub async fn deliver(&self, payload: &SubmissionPayload, observer: &dyn SessionObserver) -> u32 {
        let mut attempts = 0u32;
        loop {
            if !self.connectivity.is_online().await {
                observer.on_submission_status(&SubmissionStatus::WaitingForConnection);
                tokio::time::sleep(self.policy.offline_poll).await;
                continue;
            }

            attempts += 1;
            observer.on_submission_status(&SubmissionStatus::Submitting { attempt: attempts });
            match self.sink.submit_result(payload).await {
                Ok(()) => {
                    let marker = SubmittedMarker {
                        attempt_id: payload.attempt_id,
                        submitted_at: self.clock.now(),
                    };
                    if let Err(e) = self.markers.mark_submitted(&marker) {
                        tracing::warn!("failed to persist submitted marker: {e:#}");
                    }
                    tracing::info!(
                        exam_id = %payload.exam_id,
                        attempts,
                        score = %payload.score,
                        "result submitted"
                    );
                    observer.on_submission_status(&SubmissionStatus::Submitted { attempts });
                    return attempts;
                }
                Err(e) => {
                    tracing::warn!(attempt = attempts, "result delivery failed: {e}");
                    observer.on_submission_status(&SubmissionStatus::Retrying {
                        attempt: attempts,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(self.policy.retry_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::TransportError;
    use crate::model::Score;
    use crate::observer::NoopObserver;
    use crate::persistence::StorageKeys;
    use crate::traits::{AlwaysOnline, ConnectivityFlag, MemoryStore, SystemClock};

    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
        markers: AttemptMarkers,
        submitted_seen_before_success: Mutex<bool>,
    }

    #[async_trait]
    impl ResultSink for FlakySink {
        async fn submit_result(&self, _: &SubmissionPayload) -> Result<(), TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.markers.submitted().unwrap().is_some() {
                *self.submitted_seen_before_success.lock().unwrap() = true;
            }
            if n <= self.failures {
                Err(TransportError::Server {
                    status: 503,
                    message: "unavailable".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn payload() -> SubmissionPayload {
        let grade = Grade {
            score: Score {
                correct: 1,
                total: 2,
            },
            correct: vec![],
            mistakes: vec![],
        };
        let identity = Identity {
            student_id: "s1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        };
        let now = Utc::now();
        build_payload(
            Uuid::new_v4(),
            "EX1",
            &identity,
            grade,
            now,
            now,
            TerminalReason::Completed,
        )
    }

    fn markers() -> AttemptMarkers {
        AttemptMarkers::new(Arc::new(MemoryStore::new()), StorageKeys::new("EX1", "s1"))
    }

    #[tokio::test(start_paused = true)]
    async fn n_failures_then_success_makes_n_plus_one_attempts() {
        let markers = markers();
        let sink = Arc::new(FlakySink {
            failures: 4,
            calls: AtomicU32::new(0),
            markers: markers.clone(),
            submitted_seen_before_success: Mutex::new(false),
        });
        let pipeline = SubmissionPipeline::new(
            sink.clone(),
            Arc::new(AlwaysOnline),
            markers.clone(),
            Arc::new(SystemClock),
            RetryPolicy::default(),
        );

        let attempts = pipeline.deliver(&payload(), &NoopObserver).await;
        assert_eq!(attempts, 5);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 5);
        assert!(!*sink.submitted_seen_before_success.lock().unwrap());
        assert!(markers.submitted().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_connectivity_before_first_attempt() {
        let markers = markers();
        let sink = Arc::new(FlakySink {
            failures: 0,
            calls: AtomicU32::new(0),
            markers: markers.clone(),
            submitted_seen_before_success: Mutex::new(false),
        });
        let flag = ConnectivityFlag::new(false);
        let pipeline = SubmissionPipeline::new(
            sink.clone(),
            Arc::new(flag.clone()),
            markers,
            Arc::new(SystemClock),
            RetryPolicy::default(),
        );

        let payload = payload();
        let delivery = tokio::spawn(async move { pipeline.deliver(&payload, &NoopObserver).await });
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);

        flag.set_online(true);
        assert_eq!(delivery.await.unwrap(), 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn payload_marks_violation_endings() {
        let mut p = payload();
        assert!(!p.violated);
        p = build_payload(
            p.attempt_id,
            &p.exam_id,
            &p.identity,
            Grade {
                score: p.score,
                correct: vec![],
                mistakes: vec![],
            },
            p.start_time,
            p.end_time,
            TerminalReason::StudentExit,
        );
        assert!(p.violated);
    }
}
