//! Question set loading and normalisation.
//!
//! Turns a raw exam configuration into the immutable, shuffled question list
//! for one attempt and locks the progress denominator.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::LoadFailure;
use crate::model::{ExamConfig, Question, RawQuestion};
use crate::traits::ExamSource;

/// A malformed individual question that was replaced rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Code the substitute was filed under.
    pub code: String,
    pub reason: String,
}

/// The loaded question set for one attempt.
#[derive(Debug, Clone)]
pub struct QuestionSet {
    questions: Vec<Question>,
    by_code: HashMap<String, usize>,
    denominator: usize,
    global_timeout_secs: Option<u64>,
    default_timeout_secs: u64,
    substitutions: Vec<ValidationFailure>,
}

impl QuestionSet {
    /// Questions in their shuffled delivery order.
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn get(&self, code: &str) -> Option<&Question> {
        self.by_code.get(code).map(|&i| &self.questions[i])
    }

    /// 1-based position of a code in the delivery order.
    pub fn ordinal(&self, code: &str) -> Option<usize> {
        self.by_code.get(code).map(|&i| i + 1)
    }

    /// Total question count, fixed at load time.
    pub fn denominator(&self) -> usize {
        self.denominator
    }

    pub fn global_timeout_secs(&self) -> Option<u64> {
        self.global_timeout_secs
    }

    pub fn default_timeout_secs(&self) -> u64 {
        self.default_timeout_secs
    }

    /// Questions that had to be substituted with placeholders.
    pub fn substitutions(&self) -> &[ValidationFailure] {
        &self.substitutions
    }

    /// Code → correct answer, for scoring.
    pub fn answer_key(&self) -> BTreeMap<String, String> {
        self.questions
            .iter()
            .map(|q| (q.code.clone(), q.correct_answer.clone()))
            .collect()
    }

    /// Sorted list of codes; two loads of the same bank share a fingerprint
    /// even though their shuffled orders differ.
    pub fn fingerprint(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.questions.iter().map(|q| q.code.clone()).collect();
        codes.sort();
        codes
    }
}

/// Normalise a question code.
///
/// Codes are trimmed and upper-cased; `Q0*N` and bare `0*N` become `Q` followed
/// by N padded to three digits. Anything else is kept as is.
pub fn normalize_code(raw: &str) -> String {
    let s = raw.trim().to_uppercase();
    let digits = s.strip_prefix('Q').unwrap_or(&s);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = digits.parse::<u64>() {
            return numeric_code(n);
        }
    }
    s
}

/// Number behind a normalised `Qnnn` code.
pub fn code_number(code: &str) -> Option<u64> {
    let digits = code.strip_prefix('Q')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Widest numeric code range that is padded out with placeholders. Wider
/// banks keep their questions as given.
pub const MAX_FILLED_SPAN: u64 = 1_000;

/// Smallest and largest code number, when every code is numeric.
pub fn numbered_span<'a>(codes: impl IntoIterator<Item = &'a str>) -> Option<(u64, u64)> {
    let mut span: Option<(u64, u64)> = None;
    for code in codes {
        let n = code_number(code)?;
        span = Some(match span {
            Some((min, max)) => (min.min(n), max.max(n)),
            None => (n, n),
        });
    }
    span
}

fn numeric_code(n: u64) -> String {
    format!("Q{n:03}")
}

/// Normalised but not yet shuffled question bank.
#[derive(Debug, Clone)]
pub struct NormalizedBank {
    pub questions: Vec<Question>,
    pub substitutions: Vec<ValidationFailure>,
    pub global_timeout_secs: Option<u64>,
    pub default_timeout_secs: u64,
}

/// Assign codes, substitute malformed questions and fill numeric gaps.
pub fn normalize_bank(config: &ExamConfig, fallback_timeout_secs: u64) -> NormalizedBank {
    let default_timeout_secs = config
        .default_per_question_timeout_seconds
        .filter(|&s| s > 0)
        .unwrap_or(fallback_timeout_secs);
    let global_timeout_secs = config.global_timeout_seconds.filter(|&s| s > 0);

    // Numbers already claimed by explicit codes; synthetic codes skip them.
    let claimed: HashSet<u64> = config
        .questions
        .iter()
        .filter_map(|q| q.code.as_deref())
        .filter_map(|c| code_number(&normalize_code(c)))
        .collect();
    let mut next_synthetic = 1u64;
    let mut synthesize = |taken: &HashSet<String>| loop {
        let n = next_synthetic;
        next_synthetic += 1;
        let code = numeric_code(n);
        if !claimed.contains(&n) && !taken.contains(&code) {
            return code;
        }
    };

    let mut seen = HashSet::new();
    let mut substitutions = Vec::new();
    let mut questions = Vec::with_capacity(config.questions.len());

    for raw in &config.questions {
        let given = raw.code.as_deref().map(normalize_code).unwrap_or_default();
        let code = if given.is_empty() {
            synthesize(&seen)
        } else if seen.contains(&given) {
            let fresh = synthesize(&seen);
            tracing::warn!("duplicate question code {given}, refiled as {fresh}");
            substitutions.push(ValidationFailure {
                code: fresh.clone(),
                reason: format!("duplicate code {given}"),
            });
            fresh
        } else {
            given
        };
        seen.insert(code.clone());

        let question = to_question(raw, &code, default_timeout_secs, &mut substitutions);
        questions.push(question);
    }

    match numbered_span(questions.iter().map(|q| q.code.as_str())) {
        Some((min, max)) if max - min < MAX_FILLED_SPAN => {
            questions = fill_gaps(questions, default_timeout_secs);
        }
        Some((min, max)) => {
            tracing::warn!(
                first = min,
                last = max,
                "numeric codes span too wide, gaps left unfilled"
            );
            substitutions.push(ValidationFailure {
                code: numeric_code(max),
                reason: format!(
                    "codes {} to {} span more than {MAX_FILLED_SPAN} numbers, gaps not filled",
                    numeric_code(min),
                    numeric_code(max)
                ),
            });
        }
        None => {}
    }

    NormalizedBank {
        questions,
        substitutions,
        global_timeout_secs,
        default_timeout_secs,
    }
}

fn to_question(
    raw: &RawQuestion,
    code: &str,
    default_timeout_secs: u64,
    substitutions: &mut Vec<ValidationFailure>,
) -> Question {
    let timeout_secs = raw
        .timeout_seconds
        .filter(|&s| s > 0)
        .unwrap_or(default_timeout_secs);

    if raw.prompt.trim().is_empty() {
        substitutions.push(ValidationFailure {
            code: code.to_string(),
            reason: "empty prompt".into(),
        });
        return Question {
            code: code.to_string(),
            prompt: format!("[INVALID QUESTION {code}]"),
            correct_answer: String::new(),
            timeout_secs,
            placeholder: true,
        };
    }

    Question {
        code: code.to_string(),
        prompt: raw.prompt.clone(),
        correct_answer: raw.answer.clone().unwrap_or_default().trim().to_string(),
        timeout_secs,
        placeholder: false,
    }
}

fn fill_gaps(questions: Vec<Question>, default_timeout_secs: u64) -> Vec<Question> {
    let mut by_number: BTreeMap<u64, Question> = questions
        .into_iter()
        .filter_map(|q| code_number(&q.code).map(|n| (n, q)))
        .collect();

    let (Some(&min), Some(&max)) = (by_number.keys().next(), by_number.keys().next_back()) else {
        return Vec::new();
    };

    (min..=max)
        .map(|n| {
            by_number.remove(&n).unwrap_or_else(|| {
                let code = numeric_code(n);
                Question {
                    prompt: format!("[MISSING QUESTION {code}]"),
                    code,
                    correct_answer: String::new(),
                    timeout_secs: default_timeout_secs,
                    placeholder: true,
                }
            })
        })
        .collect()
}

/// Normalise, shuffle and lock a question set from an already-fetched config.
pub fn build_question_set<R: Rng + ?Sized>(
    exam_id: &str,
    config: &ExamConfig,
    fallback_timeout_secs: u64,
    rng: &mut R,
) -> Result<QuestionSet, LoadFailure> {
    let bank = normalize_bank(config, fallback_timeout_secs);
    if bank.questions.is_empty() {
        return Err(LoadFailure::Empty {
            exam_id: exam_id.to_string(),
        });
    }

    let mut questions = bank.questions;
    questions.shuffle(rng);

    let by_code = questions
        .iter()
        .enumerate()
        .map(|(i, q)| (q.code.clone(), i))
        .collect();
    let denominator = questions.len();

    Ok(QuestionSet {
        questions,
        by_code,
        denominator,
        global_timeout_secs: bank.global_timeout_secs,
        default_timeout_secs: bank.default_timeout_secs,
        substitutions: bank.substitutions,
    })
}

/// Fetch and build the question set for one attempt.
pub async fn load_question_set<R: Rng + ?Sized>(
    source: &dyn ExamSource,
    exam_id: &str,
    fallback_timeout_secs: u64,
    rng: &mut R,
) -> Result<QuestionSet, LoadFailure> {
    let config = source
        .fetch_exam_config(exam_id)
        .await
        .map_err(|source| LoadFailure::Fetch {
            exam_id: exam_id.to_string(),
            source,
        })?;

    let set = build_question_set(exam_id, &config, fallback_timeout_secs, rng)?;
    tracing::info!(
        exam_id,
        source = source.name(),
        questions = set.denominator(),
        substitutions = set.substitutions().len(),
        "question set loaded"
    );
    Ok(set)
}
