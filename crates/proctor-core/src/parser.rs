//! TOML question bank parser.
//!
//! Loads exam question banks from TOML files and directories, and lints them.
//! The bank is turned into the same [`ExamConfig`] the HTTP collaborator
//! returns, so local and remote exams go through one loader.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::loader::{code_number, normalize_code, MAX_FILLED_SPAN};
use crate::model::{ExamConfig, ExamStatus, RawQuestion};

/// Intermediate TOML structure for parsing question bank files.
#[derive(Debug, Deserialize)]
struct TomlBankFile {
    exam: TomlExamHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlExamHeader {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default)]
    global_timeout_secs: Option<u64>,
    #[serde(default)]
    default_timeout_secs: Option<u64>,
}

fn default_status() -> String {
    "active".to_string()
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// A question bank read from disk.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    pub id: String,
    pub title: String,
    pub status: ExamStatus,
    pub config: ExamConfig,
}

/// Parse a single TOML file into a `QuestionBank`.
pub fn parse_bank(path: &Path) -> Result<QuestionBank> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read question bank: {}", path.display()))?;

    parse_bank_str(&content, path)
}

/// Parse a TOML string into a `QuestionBank`.
pub fn parse_bank_str(content: &str, source_path: &Path) -> Result<QuestionBank> {
    let parsed: TomlBankFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let status: ExamStatus = parsed
        .exam
        .status
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{}", e))?;

    let questions = parsed
        .questions
        .into_iter()
        .map(|q| RawQuestion {
            code: q.code,
            prompt: q.prompt,
            answer: q.answer,
            timeout_seconds: q.timeout_secs,
        })
        .collect();

    Ok(QuestionBank {
        id: parsed.exam.id,
        title: parsed.exam.title,
        status,
        config: ExamConfig {
            questions,
            global_timeout_seconds: parsed.exam.global_timeout_secs,
            default_per_question_timeout_seconds: parsed.exam.default_timeout_secs,
        },
    })
}

/// Recursively load all `.toml` question banks from a directory.
pub fn load_bank_directory(dir: &Path) -> Result<Vec<QuestionBank>> {
    let mut banks = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            banks.extend(load_bank_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_bank(&path) {
                Ok(bank) => banks.push(bank),
                Err(e) => {
                    tracing::warn!("skipping {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(banks)
}

/// A warning from question bank validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The normalised question code (if applicable).
    pub code: Option<String>,
    pub message: String,
}

/// Lint a question bank for issues the loader would paper over.
pub fn validate_bank(bank: &QuestionBank) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let questions = &bank.config.questions;

    if questions.is_empty() {
        warnings.push(ValidationWarning {
            code: None,
            message: "bank has no questions".into(),
        });
        return warnings;
    }

    let mut seen = HashSet::new();
    for q in questions {
        let Some(code) = q.code.as_deref().map(normalize_code) else {
            continue;
        };
        if !seen.insert(code.clone()) {
            warnings.push(ValidationWarning {
                message: format!("duplicate code: {code}"),
                code: Some(code),
            });
        }
    }

    for (i, q) in questions.iter().enumerate() {
        let label = q
            .code
            .as_deref()
            .map(normalize_code)
            .unwrap_or_else(|| format!("#{}", i + 1));
        if q.code.is_none() {
            warnings.push(ValidationWarning {
                code: None,
                message: format!("question {label} has no code, one will be assigned"),
            });
        }
        if q.prompt.trim().is_empty() {
            warnings.push(ValidationWarning {
                code: Some(label.clone()),
                message: "prompt is empty".into(),
            });
        }
        if q.answer.as_deref().map_or(true, |a| a.trim().is_empty()) {
            warnings.push(ValidationWarning {
                code: Some(label.clone()),
                message: "no answer given, the question can never be scored correct".into(),
            });
        }
        if q.timeout_seconds == Some(0) {
            warnings.push(ValidationWarning {
                code: Some(label),
                message: "timeout of 0s, the default will be used".into(),
            });
        }
    }

    let numbers: BTreeSet<u64> = seen.iter().filter_map(|c| code_number(c)).collect();
    if numbers.len() == seen.len() && questions.iter().all(|q| q.code.is_some()) {
        if let (Some(&min), Some(&max)) = (numbers.first(), numbers.last()) {
            let missing = (max - min).saturating_add(1) - numbers.len() as u64;
            if max - min >= MAX_FILLED_SPAN {
                warnings.push(ValidationWarning {
                    code: None,
                    message: format!(
                        "numeric codes span more than {MAX_FILLED_SPAN} numbers, gaps will not be filled"
                    ),
                });
            } else if missing > 0 {
                warnings.push(ValidationWarning {
                    code: None,
                    message: format!("{missing} gap(s) in numeric codes will be filled with placeholders"),
                });
            }
        }
    }

    warnings
}
