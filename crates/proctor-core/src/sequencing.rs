//! Question traversal, skip/review logic and scoring.
//!
//! The active list shrinks on skip and grows on requeue; the progress
//! denominator is copied from the loader once and never touched again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ActionRejected;
use crate::loader::QuestionSet;
use crate::model::{GradedAnswer, Phase, Progress, Score, BLANK_ANSWER};

/// One entry of the active list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub code: String,
    /// Saved remaining time; `None` starts the question's own timeout.
    pub resume_secs: Option<u64>,
}

impl Slot {
    fn fresh(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            resume_secs: None,
        }
    }
}

/// A question parked in the skip queue with the time it had left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedQuestion {
    pub code: String,
    pub remaining_secs: u64,
}

/// What the caller should do after a sequencing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Render the question at the current index.
    Render,
    /// The primary pass is exhausted with skips pending; call
    /// [`Sequencer::begin_review`] after the grace delay.
    ReviewPending,
    /// Nothing left to answer.
    Done,
}

/// Scored answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grade {
    pub score: Score,
    pub correct: Vec<GradedAnswer>,
    pub mistakes: Vec<GradedAnswer>,
}

/// Traversal state for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequencer {
    active: Vec<Slot>,
    current_index: usize,
    answers: BTreeMap<String, String>,
    drafts: BTreeMap<String, String>,
    skip_queue: Vec<SkippedQuestion>,
    phase: Phase,
    denominator: usize,
    review_pending: bool,
}

impl Sequencer {
    /// Start a primary pass over the loaded order.
    pub fn new(set: &QuestionSet) -> Self {
        let mut seq = Self::from_order(set.questions().iter().map(|q| q.code.clone()));
        seq.denominator = set.denominator();
        seq
    }

    /// Start a primary pass over an explicit code order.
    pub fn from_order(codes: impl IntoIterator<Item = String>) -> Self {
        let active: Vec<Slot> = codes.into_iter().map(Slot::fresh).collect();
        let denominator = active.len();
        let phase = if active.is_empty() {
            Phase::Done
        } else {
            Phase::Primary
        };
        Self {
            active,
            current_index: 0,
            answers: BTreeMap::new(),
            drafts: BTreeMap::new(),
            skip_queue: Vec::new(),
            phase,
            denominator,
            review_pending: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// True between primary exhaustion and [`Sequencer::begin_review`].
    pub fn is_review_pending(&self) -> bool {
        self.review_pending
    }

    pub fn current(&self) -> Option<&Slot> {
        if self.review_pending || self.is_done() {
            return None;
        }
        self.active.get(self.current_index)
    }

    pub fn current_code(&self) -> Option<&str> {
        self.current().map(|s| s.code.as_str())
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn active(&self) -> &[Slot] {
        &self.active
    }

    pub fn skip_queue(&self) -> &[SkippedQuestion] {
        &self.skip_queue
    }

    pub fn answers(&self) -> &BTreeMap<String, String> {
        &self.answers
    }

    pub fn denominator(&self) -> usize {
        self.denominator
    }

    pub fn progress(&self) -> Progress {
        Progress {
            answered: self.answers.len(),
            total: self.denominator,
        }
    }

    pub fn draft(&self, code: &str) -> Option<&str> {
        self.drafts.get(code).map(String::as_str)
    }

    /// Record in-progress text for the current question.
    pub fn set_draft(&mut self, text: &str) -> Result<(), ActionRejected> {
        let code = self.require_current()?.code.clone();
        if text.is_empty() {
            self.drafts.remove(&code);
        } else {
            self.drafts.insert(code, text.to_string());
        }
        Ok(())
    }

    /// Answer the current question and advance.
    pub fn submit(&mut self, answer: &str) -> Result<Advance, ActionRejected> {
        let code = self.require_current()?.code.clone();
        let answer = answer.trim();
        let answer = if answer.is_empty() {
            BLANK_ANSWER
        } else {
            answer
        };

        self.skip_queue.retain(|s| s.code != code);
        self.drafts.remove(&code);
        self.answers.insert(code, answer.to_string());
        self.current_index += 1;
        Ok(self.settle())
    }

    /// Answer the current question with its draft, or blank.
    pub fn expire_current(&mut self) -> Result<Advance, ActionRejected> {
        let code = self.require_current()?.code.clone();
        let answer = self.drafts.get(&code).cloned().unwrap_or_default();
        self.submit(&answer)
    }

    /// Park the current question with `remaining_secs` left.
    pub fn skip(&mut self, remaining_secs: u64) -> Result<Advance, ActionRejected> {
        self.require_current()?;
        if self.phase == Phase::Review {
            return Err(ActionRejected::SkipInReview);
        }

        let slot = self.active.remove(self.current_index);
        if !self.skip_queue.iter().any(|s| s.code == slot.code) {
            self.skip_queue.push(SkippedQuestion {
                code: slot.code,
                remaining_secs,
            });
        }
        Ok(self.settle())
    }

    /// Pull `code` out of the skip queue into the current slot.
    ///
    /// The displaced question keeps `current_remaining_secs` for when it comes
    /// round again.
    pub fn requeue_now(
        &mut self,
        code: &str,
        current_remaining_secs: u64,
    ) -> Result<Advance, ActionRejected> {
        self.require_current()?;
        let Some(pos) = self.skip_queue.iter().position(|s| s.code == code) else {
            return Err(ActionRejected::NotSkipped(code.to_string()));
        };
        let entry = self.skip_queue.remove(pos);

        if let Some(displaced) = self.active.get_mut(self.current_index) {
            displaced.resume_secs = Some(current_remaining_secs);
        }
        self.active.insert(
            self.current_index,
            Slot {
                code: entry.code,
                resume_secs: Some(entry.remaining_secs),
            },
        );
        Ok(Advance::Render)
    }

    /// Enter the review phase with the whole skip queue.
    pub fn begin_review(&mut self) -> Result<Advance, ActionRejected> {
        if self.is_done() {
            return Err(ActionRejected::Inactive);
        }
        if !self.review_pending {
            return Err(ActionRejected::Transitioning);
        }

        self.active = self
            .skip_queue
            .drain(..)
            .map(|s| Slot {
                code: s.code,
                resume_secs: Some(s.remaining_secs),
            })
            .collect();
        self.current_index = 0;
        self.phase = Phase::Review;
        self.review_pending = false;
        tracing::info!(questions = self.active.len(), "review phase started");
        Ok(self.settle())
    }

    /// Store the current question's remaining time so a restored sequencer
    /// resumes it instead of restarting it.
    pub fn save_current_remaining(&mut self, remaining_secs: u64) {
        if self.review_pending || self.is_done() {
            return;
        }
        if let Some(slot) = self.active.get_mut(self.current_index) {
            slot.resume_secs = Some(remaining_secs);
        }
    }

    /// Stop traversal without finishing the question list.
    pub fn finish(&mut self) {
        self.phase = Phase::Done;
        self.review_pending = false;
    }

    /// Score the answers against `key`.
    ///
    /// Blank (`-`) answers are neither correct nor mistakes; the total is
    /// always the locked denominator.
    pub fn grade(&self, key: &BTreeMap<String, String>) -> Grade {
        let mut correct = Vec::new();
        let mut mistakes = Vec::new();

        for (code, expected) in key {
            let Some(given) = self.answers.get(code) else {
                continue;
            };
            if given.is_empty() {
                continue;
            }
            let entry = GradedAnswer {
                code: code.clone(),
                answer: given.clone(),
            };
            if !expected.is_empty() && given.to_lowercase() == expected.trim().to_lowercase() {
                correct.push(entry);
            } else if given != BLANK_ANSWER {
                mistakes.push(entry);
            }
        }

        Grade {
            score: Score {
                correct: correct.len() as u32,
                total: self.denominator as u32,
            },
            correct,
            mistakes,
        }
    }

    fn require_current(&self) -> Result<&Slot, ActionRejected> {
        if self.is_done() {
            return Err(ActionRejected::Inactive);
        }
        if self.review_pending {
            return Err(ActionRejected::Transitioning);
        }
        self.active
            .get(self.current_index)
            .ok_or(ActionRejected::NoCurrentQuestion)
    }

    fn settle(&mut self) -> Advance {
        if self.current_index < self.active.len() {
            return Advance::Render;
        }
        if self.phase == Phase::Primary && !self.skip_queue.is_empty() {
            self.review_pending = true;
            return Advance::ReviewPending;
        }
        self.phase = Phase::Done;
        Advance::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten() -> Sequencer {
        Sequencer::from_order((1..=10).map(|n| format!("Q{n:03}")))
    }

    fn key(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(c, a)| (c.to_string(), a.to_string()))
            .collect()
    }

    #[test]
    fn skip_then_review_restores_saved_times() {
        let mut seq = ten();
        let mut advance = Advance::Render;
        while seq.current().is_some() {
            let code = seq.current_code().unwrap().to_string();
            advance = match code.as_str() {
                "Q003" => seq.skip(17).unwrap(),
                "Q007" => seq.skip(9).unwrap(),
                _ => seq.submit("a").unwrap(),
            };
            assert_eq!(seq.progress().total, 10);
        }
        assert_eq!(advance, Advance::ReviewPending);
        assert_eq!(seq.progress().answered, 8);

        assert_eq!(seq.begin_review().unwrap(), Advance::Render);
        assert_eq!(seq.phase(), Phase::Review);
        assert!(seq.skip_queue().is_empty());
        let review: Vec<(&str, Option<u64>)> = seq
            .active()
            .iter()
            .map(|s| (s.code.as_str(), s.resume_secs))
            .collect();
        assert_eq!(review, vec![("Q003", Some(17)), ("Q007", Some(9))]);

        assert_eq!(seq.submit("x").unwrap(), Advance::Render);
        assert_eq!(seq.submit("y").unwrap(), Advance::Done);
        assert_eq!(seq.progress().answered, 10);
        assert_eq!(seq.denominator(), 10);
    }

    #[test]
    fn no_skips_goes_straight_to_done() {
        let mut seq = Sequencer::from_order(vec!["Q001".to_string()]);
        assert_eq!(seq.submit("a").unwrap(), Advance::Done);
        assert!(seq.is_done());
        assert_eq!(seq.submit("b"), Err(ActionRejected::Inactive));
    }

    #[test]
    fn skip_is_rejected_during_review() {
        let mut seq = Sequencer::from_order(vec!["Q001".to_string(), "Q002".to_string()]);
        seq.skip(5).unwrap();
        assert_eq!(seq.submit("a").unwrap(), Advance::ReviewPending);
        assert_eq!(seq.submit("a"), Err(ActionRejected::Transitioning));
        seq.begin_review().unwrap();
        assert_eq!(seq.skip(3), Err(ActionRejected::SkipInReview));
    }

    #[test]
    fn requeue_inserts_at_current_slot() {
        let mut seq = ten();
        seq.skip(12).unwrap(); // Q001
        assert_eq!(seq.current_code(), Some("Q002"));
        assert_eq!(seq.requeue_now("Q001", 25).unwrap(), Advance::Render);
        assert_eq!(seq.current_code(), Some("Q001"));
        assert_eq!(seq.current().unwrap().resume_secs, Some(12));
        assert!(seq.skip_queue().is_empty());

        seq.submit("a").unwrap();
        assert_eq!(seq.current_code(), Some("Q002"));
        assert_eq!(seq.current().unwrap().resume_secs, Some(25));
    }

    #[test]
    fn requeue_of_unknown_code_is_rejected() {
        let mut seq = ten();
        assert_eq!(
            seq.requeue_now("Q009", 10),
            Err(ActionRejected::NotSkipped("Q009".into()))
        );
    }

    #[test]
    fn skipped_question_appears_exactly_once_more() {
        let mut seq = ten();
        seq.skip(10).unwrap(); // Q001
        seq.requeue_now("Q001", 30).unwrap();
        seq.skip(8).unwrap(); // Q001 again
        assert_eq!(seq.skip_queue().len(), 1);
        assert_eq!(seq.skip_queue()[0].remaining_secs, 8);
        while seq.current().is_some() {
            seq.submit("a").unwrap();
        }
        seq.begin_review().unwrap();
        let codes: Vec<&str> = seq.active().iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["Q001"]);
    }

    #[test]
    fn expiry_submits_draft_or_blank() {
        let mut seq = Sequencer::from_order(vec!["Q001".to_string(), "Q002".to_string()]);
        seq.set_draft("  42 ").unwrap();
        seq.expire_current().unwrap();
        seq.expire_current().unwrap();
        assert_eq!(seq.answers().get("Q001").map(String::as_str), Some("42"));
        assert_eq!(seq.answers().get("Q002").map(String::as_str), Some("-"));
    }

    #[test]
    fn grading_is_case_insensitive_and_ignores_blanks() {
        let mut seq = Sequencer::from_order((1..=4).map(|n| format!("Q{n:03}")));
        seq.submit("Paris").unwrap();
        seq.submit("wrong").unwrap();
        seq.submit("").unwrap();
        seq.submit("anything").unwrap();
        let grade = seq.grade(&key(&[
            ("Q001", "paris"),
            ("Q002", "4"),
            ("Q003", "x"),
            ("Q004", ""),
        ]));
        assert_eq!(grade.score.to_string(), "1/4");
        assert_eq!(grade.correct[0].to_string(), "Q001 Paris");
        let mistakes: Vec<&str> = grade.mistakes.iter().map(|m| m.code.as_str()).collect();
        assert_eq!(mistakes, vec!["Q002", "Q004"]);
    }
}
