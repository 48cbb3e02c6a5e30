//! Engine timing and policy settings.

use std::time::Duration;

/// Settings shared by every engine component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Counted violations that terminate the attempt.
    pub violation_limit: u32,
    /// Length of the freeze shown after a non-terminal violation.
    pub warning_freeze: Duration,
    /// Detections inside this window after a counted violation are discarded.
    pub reentrancy_window: Duration,
    /// Pause between primary exhaustion and the review phase.
    pub review_grace: Duration,
    /// Wait after a failed result delivery.
    pub retry_interval: Duration,
    /// Connectivity poll while waiting to submit.
    pub offline_poll: Duration,
    /// Cadence of the periodic ledger integrity check.
    pub tamper_check_interval: Duration,
    pub inactivity_threshold: Duration,
    pub inactivity_check_interval: Duration,
    /// Resize delta (either axis) treated as a violation.
    pub resize_threshold_px: u32,
    /// Resize detection only runs on desktop clients.
    pub desktop: bool,
    /// Per-question timeout when the exam configuration has none.
    pub default_question_timeout_secs: u64,
    /// Granularity of the engine clock.
    pub tick: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            violation_limit: 3,
            warning_freeze: Duration::from_secs(20),
            reentrancy_window: Duration::from_millis(800),
            review_grace: Duration::from_millis(600),
            retry_interval: Duration::from_millis(1500),
            offline_poll: Duration::from_millis(1500),
            tamper_check_interval: Duration::from_secs(20),
            inactivity_threshold: Duration::from_secs(300),
            inactivity_check_interval: Duration::from_secs(60),
            resize_threshold_px: 200,
            desktop: true,
            default_question_timeout_secs: 30,
            tick: Duration::from_millis(250),
        }
    }
}
