//! HTTP exam backend.
//!
//! One client implements every network port: exam config, exam status,
//! violation intake, result submission and the connectivity probe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use tracing::instrument;

use proctor_core::error::TransportError;
use proctor_core::model::{ExamConfig, ExamStatus, SubmissionPayload, ViolationReport};
use proctor_core::traits::{Connectivity, ExamSource, ResultSink, ViolationSink};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Client for the exam backend's JSON API.
pub struct HttpBackend {
    base_url: String,
    api_token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            timeout_secs: timeout.as_secs(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/api/exams/{id}/config` with the id escaped as a single segment.
    fn exam_config_url(&self, exam_id: &str) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.url("/api/exams"))
            .map_err(|e| TransportError::Network(format!("invalid backend URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| TransportError::Network("backend URL cannot take a path".into()))?
            .push(exam_id)
            .push("config");
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = self.authorized(request).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout_secs)
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Envelope>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(body);
            return Err(TransportError::Server { status, message });
        }
        Ok(response)
    }

    /// POST `body` and require an acknowledgment.
    async fn post_ack<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(), TransportError> {
        let response = self
            .send(self.client.post(self.url(path)).json(body))
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        // Any 2xx acknowledges unless the body says `success: false`.
        match serde_json::from_str::<Envelope>(&text) {
            Ok(Envelope {
                success: Some(false),
                message,
            }) => Err(TransportError::Rejected(
                message.unwrap_or_else(|| "success=false".into()),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ConfigResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    config: ExamConfig,
}

#[derive(Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl ExamSource for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self))]
    async fn fetch_exam_config(&self, exam_id: &str) -> Result<ExamConfig, TransportError> {
        let url = self.exam_config_url(exam_id)?;
        let response = self.send(self.client.get(url)).await?;
        let body: ConfigResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        if body.success == Some(false) {
            return Err(TransportError::Rejected(
                body.message
                    .unwrap_or_else(|| format!("exam '{exam_id}' config refused")),
            ));
        }
        tracing::debug!(questions = body.config.questions.len(), "exam config fetched");
        Ok(body.config)
    }

    #[instrument(skip(self))]
    async fn exam_status(&self, exam_id: &str) -> Result<ExamStatus, TransportError> {
        let url = Url::parse_with_params(&self.url("/api/exams/verify"), &[("code", exam_id)])
            .map_err(|e| TransportError::Network(format!("invalid backend URL: {e}")))?;
        let response = self.send(self.client.get(url)).await?;
        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        if body.success == Some(false) {
            return Err(TransportError::Rejected(
                body.message.unwrap_or_else(|| "exam not verified".into()),
            ));
        }
        let raw = body
            .status
            .ok_or_else(|| TransportError::Decode("verify response has no status".into()))?;
        raw.parse().map_err(TransportError::Decode)
    }
}

#[async_trait]
impl ViolationSink for HttpBackend {
    #[instrument(skip(self, report), fields(kind = %report.violation_type))]
    async fn report_violation(&self, report: &ViolationReport) -> Result<(), TransportError> {
        self.post_ack("/api/violations", report).await
    }
}

#[async_trait]
impl ResultSink for HttpBackend {
    #[instrument(skip(self, payload), fields(attempt_id = %payload.attempt_id))]
    async fn submit_result(&self, payload: &SubmissionPayload) -> Result<(), TransportError> {
        self.post_ack("/api/results", payload).await
    }
}

#[async_trait]
impl Connectivity for HttpBackend {
    async fn is_online(&self) -> bool {
        let request = self
            .client
            .get(self.url("/api/health"))
            .timeout(HEALTH_TIMEOUT);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("health probe failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proctor_core::model::{Identity, Score, Severity, TerminalReason, ViolationKind};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> HttpBackend {
        HttpBackend::new(&server.uri(), Some("tok".into()), None).unwrap()
    }

    fn report() -> ViolationReport {
        ViolationReport {
            student_id: "s1".into(),
            student_name: "Ada Lovelace".into(),
            exam_id: "MATH101".into(),
            violation_type: ViolationKind::FullscreenExit,
            description: "Exited full screen".into(),
            severity: Severity::Medium,
            timestamp: Utc::now(),
        }
    }

    fn payload() -> SubmissionPayload {
        SubmissionPayload {
            attempt_id: Uuid::new_v4(),
            exam_id: "MATH101".into(),
            identity: Identity {
                student_id: "s1".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            },
            score: Score {
                correct: 1,
                total: 2,
            },
            correct_list: vec![],
            mistake_list: vec![],
            start_time: Utc::now(),
            end_time: Utc::now(),
            reason: TerminalReason::Completed,
            violated: false,
        }
    }

    #[tokio::test]
    async fn fetches_exam_config_with_original_field_names() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "success": true,
            "questions": [
                {"code": "Q001", "question": "2 + 2?", "answer": "4", "timerSeconds": 20},
                {"code": "Q002", "question": "Capital of France?", "answer": "Paris"}
            ],
            "globalExamTimerSeconds": 600
        });

        Mock::given(method("GET"))
            .and(path("/api/exams/MATH101/config"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let config = backend(&server).fetch_exam_config("MATH101").await.unwrap();
        assert_eq!(config.questions.len(), 2);
        assert_eq!(config.questions[0].prompt, "2 + 2?");
        assert_eq!(config.questions[0].timeout_seconds, Some(20));
        assert_eq!(config.global_timeout_seconds, Some(600));
    }

    #[tokio::test]
    async fn exam_id_is_escaped_in_the_config_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/exams/A%2FB%3Fx%23y/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "questions": [{"code": "Q001", "question": "1 + 1?", "answer": "2"}]
            })))
            .mount(&server)
            .await;

        let config = backend(&server).fetch_exam_config("A/B?x#y").await.unwrap();
        assert_eq!(config.questions.len(), 1);
    }

    #[tokio::test]
    async fn exam_status_from_verify_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/exams/verify"))
            .and(query_param("code", "MATH101"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "status": "draft", "examId": 4, "title": "Algebra"
            })))
            .mount(&server)
            .await;

        let status = backend(&server).exam_status("MATH101").await.unwrap();
        assert_eq!(status, ExamStatus::Draft);
    }

    #[tokio::test]
    async fn unknown_exam_is_a_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/exams/verify"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "success": false, "message": "Invalid test code."
            })))
            .mount(&server)
            .await;

        let err = backend(&server).exam_status("NOPE").await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Server {
                status: 404,
                message: "Invalid test code.".into()
            }
        );
        assert!(!err.is_connectivity());
    }

    #[tokio::test]
    async fn violation_report_is_posted_as_camel_case() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/violations"))
            .and(body_partial_json(serde_json::json!({
                "studentId": "s1",
                "violationType": "FULLSCREEN_EXIT",
                "severity": "medium"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server).report_violation(&report()).await.unwrap();
    }

    #[tokio::test]
    async fn success_false_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/results"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false, "message": "duplicate"
            })))
            .mount(&server)
            .await;

        let err = backend(&server).submit_result(&payload()).await.unwrap_err();
        assert_eq!(err, TransportError::Rejected("duplicate".into()));
    }

    #[tokio::test]
    async fn empty_2xx_body_is_an_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/results"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        backend(&server).submit_result(&payload()).await.unwrap();
    }

    #[tokio::test]
    async fn server_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/results"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = backend(&server).submit_result(&payload()).await.unwrap_err();
        assert!(matches!(err, TransportError::Server { status: 503, .. }));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connectivity_error() {
        // Port 9 (discard) is essentially never listening locally.
        let backend = HttpBackend::new("http://127.0.0.1:9", None, None).unwrap();
        let err = backend.report_violation(&report()).await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(!backend.is_online().await);
    }

    #[tokio::test]
    async fn health_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(backend(&server).is_online().await);
    }
}
