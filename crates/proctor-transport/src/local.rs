//! Local, offline adapters: question banks on disk, results written as JSON
//! files and violations appended to a JSON-lines log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use proctor_core::error::TransportError;
use proctor_core::model::{ExamConfig, ExamStatus, SubmissionPayload, ViolationReport};
use proctor_core::parser::{load_bank_directory, parse_bank, QuestionBank};
use proctor_core::traits::{ExamSource, ResultSink, ViolationSink};

/// Exam source backed by TOML question banks.
pub struct FileExamSource {
    banks: HashMap<String, QuestionBank>,
}

impl FileExamSource {
    pub fn new(banks: Vec<QuestionBank>) -> Self {
        Self {
            banks: banks.into_iter().map(|b| (b.id.clone(), b)).collect(),
        }
    }

    /// Load one bank file, or every bank under a directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let banks = if path.is_dir() {
            load_bank_directory(path)?
        } else {
            vec![parse_bank(path)?]
        };
        if banks.is_empty() {
            anyhow::bail!("no question banks found in {}", path.display());
        }
        tracing::info!(banks = banks.len(), "loaded question banks from {}", path.display());
        Ok(Self::new(banks))
    }

    pub fn exam_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.banks.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn bank(&self, exam_id: &str) -> Result<&QuestionBank, TransportError> {
        self.banks.get(exam_id).ok_or_else(|| TransportError::Server {
            status: 404,
            message: format!("no question bank for exam '{exam_id}'"),
        })
    }
}

#[async_trait]
impl ExamSource for FileExamSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_exam_config(&self, exam_id: &str) -> Result<ExamConfig, TransportError> {
        Ok(self.bank(exam_id)?.config.clone())
    }

    async fn exam_status(&self, exam_id: &str) -> Result<ExamStatus, TransportError> {
        Ok(self.bank(exam_id)?.status)
    }
}

/// Writes each delivered result to `<dir>/<exam>-<student>-<attempt>.json`.
pub struct FileResultSink {
    dir: PathBuf,
}

impl FileResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, payload: &SubmissionPayload) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}.json",
            payload.exam_id, payload.identity.student_id, payload.attempt_id
        ))
    }
}

#[async_trait]
impl ResultSink for FileResultSink {
    async fn submit_result(&self, payload: &SubmissionPayload) -> Result<(), TransportError> {
        let io = |e: std::io::Error| TransportError::Network(e.to_string());
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;
        let json = serde_json::to_string_pretty(payload)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        let path = self.path_for(payload);
        tokio::fs::write(&path, json).await.map_err(io)?;
        tracing::info!(path = %path.display(), "result written");
        Ok(())
    }
}

/// Logs violations and, when given a path, appends them as JSON lines.
pub struct LogViolationSink {
    path: Option<PathBuf>,
}

impl LogViolationSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    async fn append(&self, path: &Path, report: &ViolationReport) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(report)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ViolationSink for LogViolationSink {
    async fn report_violation(&self, report: &ViolationReport) -> Result<(), TransportError> {
        tracing::warn!(
            exam_id = %report.exam_id,
            student_id = %report.student_id,
            kind = %report.violation_type,
            severity = ?report.severity,
            "{}",
            report.description
        );
        if let Some(path) = &self.path {
            self.append(path, report)
                .await
                .map_err(|e| TransportError::Network(format!("{e:#}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proctor_core::model::{Identity, Score, Severity, TerminalReason, ViolationKind};
    use uuid::Uuid;

    const BANK: &str = r#"
[exam]
id = "MATH101"
status = "completed"

[[questions]]
code = "Q001"
prompt = "2 + 2?"
answer = "4"
"#;

    #[tokio::test]
    async fn file_source_serves_bank_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("math.toml");
        std::fs::write(&path, BANK).unwrap();

        let source = FileExamSource::from_path(&path).unwrap();
        assert_eq!(source.exam_ids(), vec!["MATH101"]);
        assert_eq!(
            source.exam_status("MATH101").await.unwrap(),
            ExamStatus::Completed
        );
        assert_eq!(
            source.fetch_exam_config("MATH101").await.unwrap().questions.len(),
            1
        );
        assert!(matches!(
            source.exam_status("OTHER").await,
            Err(TransportError::Server { status: 404, .. })
        ));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileExamSource::from_path(dir.path()).is_err());
    }

    #[tokio::test]
    async fn result_sink_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileResultSink::new(dir.path().join("results"));
        let payload = SubmissionPayload {
            attempt_id: Uuid::new_v4(),
            exam_id: "MATH101".into(),
            identity: Identity {
                student_id: "s1".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            },
            score: Score {
                correct: 0,
                total: 1,
            },
            correct_list: vec![],
            mistake_list: vec![],
            start_time: Utc::now(),
            end_time: Utc::now(),
            reason: TerminalReason::TimeExpired,
            violated: false,
        };
        sink.submit_result(&payload).await.unwrap();

        let written = std::fs::read_to_string(sink.path_for(&payload)).unwrap();
        let back: SubmissionPayload = serde_json::from_str(&written).unwrap();
        assert_eq!(back.reason, TerminalReason::TimeExpired);
    }

    #[tokio::test]
    async fn violation_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("violations.jsonl");
        let sink = LogViolationSink::new(Some(path.clone()));
        for kind in [ViolationKind::TabSwitch, ViolationKind::RightClick] {
            let report = ViolationReport {
                student_id: "s1".into(),
                student_name: "Ada Lovelace".into(),
                exam_id: "MATH101".into(),
                violation_type: kind,
                description: "test".into(),
                severity: Severity::Low,
                timestamp: Utc::now(),
            };
            sink.report_violation(&report).await.unwrap();
        }
        let log = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("RIGHT_CLICK"));
    }
}
