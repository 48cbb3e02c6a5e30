//! Tick-driven countdowns.
//!
//! Countdowns never read a clock. The runtime feeds elapsed time through
//! `tick`, which keeps expiry ordering deterministic under paused-time tests.

use std::time::Duration;

/// A single countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining: Duration,
}

impl Countdown {
    pub fn new(duration: Duration) -> Self {
        Self {
            remaining: duration,
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Consume `elapsed`; returns `true` once the countdown reaches zero.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        self.remaining = self.remaining.saturating_sub(elapsed);
        self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        self.remaining.is_zero()
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Whole seconds left, rounded up (what a countdown display shows).
    pub fn remaining_secs(&self) -> u64 {
        let secs = self.remaining.as_secs();
        if self.remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Outcome of advancing the timer set by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub global_expired: bool,
    pub question_expired: bool,
    /// A displayed whole-second value changed during this tick.
    pub second_boundary: bool,
}

/// The global exam timer and the per-question timer.
///
/// Each kind holds at most one live countdown; starting a new one replaces
/// the previous.
#[derive(Debug, Clone, Default)]
pub struct TimerSet {
    global: Option<Countdown>,
    question: Option<Countdown>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_global(&mut self, secs: u64) {
        self.global = Some(Countdown::from_secs(secs));
    }

    pub fn start_question(&mut self, secs: u64) {
        self.question = Some(Countdown::from_secs(secs));
    }

    pub fn cancel_question(&mut self) {
        self.question = None;
    }

    /// Drop every live countdown; nothing fires afterwards.
    pub fn cancel_all(&mut self) {
        self.global = None;
        self.question = None;
    }

    pub fn global_remaining_secs(&self) -> Option<u64> {
        self.global.map(|c| c.remaining_secs())
    }

    pub fn question_remaining_secs(&self) -> Option<u64> {
        self.question.map(|c| c.remaining_secs())
    }

    pub fn is_idle(&self) -> bool {
        self.global.is_none() && self.question.is_none()
    }

    /// Advance both countdowns. Expired countdowns are removed.
    pub fn tick(&mut self, elapsed: Duration) -> TickReport {
        let mut report = TickReport::default();

        if let Some(global) = self.global.as_mut() {
            let before = global.remaining_secs();
            report.global_expired = global.advance(elapsed);
            report.second_boundary |= global.remaining_secs() != before;
            if report.global_expired {
                self.global = None;
            }
        }

        if let Some(question) = self.question.as_mut() {
            let before = question.remaining_secs();
            report.question_expired = question.advance(elapsed);
            report.second_boundary |= question.remaining_secs() != before;
            if report.question_expired {
                self.question = None;
            }
        }

        report
    }
}
