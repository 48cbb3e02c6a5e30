//! Violation classification and the escalation policy.
//!
//! The monitor is a pure state machine. Raw input signals go in through
//! [`IntegrityMonitor::observe`], elapsed time through
//! [`IntegrityMonitor::tick`]; both hand back what the session has to do.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::ActionRejected;
use crate::model::ViolationKind;
use crate::timer::Countdown;

/// A key press as seen by the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
    /// Focus was inside the answer field.
    #[serde(default)]
    pub in_answer_field: bool,
}

impl KeyPress {
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn ctrl(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: true,
            ..Self::default()
        }
    }

    fn command(&self) -> bool {
        self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardAction {
    Copy,
    Paste,
    Cut,
}

/// Raw input the page reports to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum InputSignal {
    VisibilityHidden,
    WindowBlur,
    FullscreenExited,
    Key(KeyPress),
    ContextMenu { on_input: bool },
    Clipboard { action: ClipboardAction, in_answer_field: bool },
    ScriptDetected { src: String },
    /// Pointer movement, clicks, scrolling.
    Activity,
    /// The page is being reloaded or closed.
    Unload,
    BackNavigation,
    Resized { width: u32, height: u32 },
}

/// A classified violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub kind: ViolationKind,
    pub description: String,
}

impl Detection {
    pub fn new(kind: ViolationKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

/// Classify a key press; `None` for keys that are allowed.
pub fn classify_key(key: &KeyPress) -> Option<Detection> {
    use ViolationKind::*;

    let lower = key.key.to_lowercase();
    let detection = match lower.as_str() {
        "f12" => Detection::new(DevTools, "Developer tools shortcut detected"),
        "i" | "k" if key.command() && key.shift => {
            Detection::new(DevTools, "Developer tools shortcut detected")
        }
        "f5" => Detection::new(ReloadAttempt, "Reload key detected"),
        "r" if key.command() => Detection::new(ReloadAttempt, "Reload key detected"),
        "w" if key.command() => Detection::new(CloseAttempt, "Attempt to close tab detected"),
        "c" if key.command() => Detection::new(CopyAttempt, "Copy attempt detected"),
        "v" if key.command() && !key.in_answer_field => {
            Detection::new(PasteAttempt, "Paste attempt detected")
        }
        "x" if key.command() => Detection::new(CutAttempt, "Cut attempt detected"),
        "a" if key.command() => Detection::new(SelectAll, "Select-all attempt detected"),
        "t" | "n" if key.command() => {
            Detection::new(KeyboardShortcut, "Disallowed keyboard shortcut detected")
        }
        "tab" if key.alt => Detection::new(AltTab, "Alt+Tab detected"),
        "printscreen" => Detection::new(ScreenshotAttempt, "Screenshot detected"),
        _ => return None,
    };
    Some(detection)
}

/// The freeze shown after a non-terminal violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: ViolationKind,
    pub count: u32,
    pub remaining_violations: u32,
    countdown: Countdown,
}

impl Warning {
    pub fn remaining_secs(&self) -> u64 {
        self.countdown.remaining_secs()
    }
}

/// Result of feeding one detection through the escalation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// No violation, or the monitor is inactive.
    None,
    /// Discarded by the re-entrancy lock.
    Suppressed(Detection),
    /// Counted; interaction is frozen.
    Warn {
        detection: Detection,
        count: u32,
        remaining_violations: u32,
    },
    /// Counted and the limit was reached.
    Terminate { detection: Detection, count: u32 },
}

/// A lifted freeze.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningLifted {
    pub kind: ViolationKind,
    /// Restricted display mode must be re-requested.
    pub request_fullscreen: bool,
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorTick {
    pub lifted: Option<WarningLifted>,
    pub inactivity: Option<Escalation>,
    /// The displayed freeze countdown changed.
    pub countdown_changed: bool,
}

/// Counts violations and drives freezes.
#[derive(Debug, Clone)]
pub struct IntegrityMonitor {
    limit: u32,
    freeze: Duration,
    reentrancy_window: Duration,
    inactivity_threshold: Duration,
    inactivity_check_interval: Duration,
    resize_threshold_px: u32,
    desktop: bool,

    active: bool,
    elapsed: Duration,
    count: u32,
    locked_until: Option<Duration>,
    warning: Option<Warning>,
    last_activity: Duration,
    next_inactivity_check: Duration,
    viewport: Option<(u32, u32)>,
    seen_scripts: HashSet<String>,
}

impl IntegrityMonitor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            limit: config.violation_limit.max(1),
            freeze: config.warning_freeze,
            reentrancy_window: config.reentrancy_window,
            inactivity_threshold: config.inactivity_threshold,
            inactivity_check_interval: config.inactivity_check_interval,
            resize_threshold_px: config.resize_threshold_px,
            desktop: config.desktop,
            active: true,
            elapsed: Duration::ZERO,
            count: 0,
            locked_until: None,
            warning: None,
            last_activity: Duration::ZERO,
            next_inactivity_check: config.inactivity_check_interval,
            viewport: None,
            seen_scripts: HashSet::new(),
        }
    }

    /// Carry a violation count over from a restored snapshot.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_frozen(&self) -> bool {
        self.warning.is_some()
    }

    pub fn warning(&self) -> Option<&Warning> {
        self.warning.as_ref()
    }

    /// Stop counting; nothing escalates afterwards.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.warning = None;
        self.locked_until = None;
    }

    /// Baseline for resize detection.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = Some((width, height));
    }

    pub fn note_activity(&mut self) {
        self.last_activity = self.elapsed;
    }

    /// Classify a signal against the monitor's own state. Updates the
    /// activity baseline, the viewport and the seen-script set.
    pub fn classify(&mut self, signal: &InputSignal) -> Option<Detection> {
        use ViolationKind::*;

        match signal {
            InputSignal::VisibilityHidden => Some(Detection::new(TabSwitch, "Tab switched away")),
            InputSignal::WindowBlur => Some(Detection::new(WindowBlur, "Window lost focus")),
            InputSignal::FullscreenExited => {
                Some(Detection::new(FullscreenExit, "Fullscreen exited"))
            }
            InputSignal::Key(key) => {
                self.note_activity();
                classify_key(key)
            }
            InputSignal::ContextMenu { on_input } => {
                self.note_activity();
                (!on_input).then(|| Detection::new(RightClick, "Right-click blocked"))
            }
            InputSignal::Clipboard {
                action,
                in_answer_field,
            } => {
                self.note_activity();
                match action {
                    ClipboardAction::Copy => Some(Detection::new(CopyAttempt, "Copy action blocked")),
                    ClipboardAction::Cut => Some(Detection::new(CutAttempt, "Cut action blocked")),
                    ClipboardAction::Paste if *in_answer_field => None,
                    ClipboardAction::Paste => {
                        Some(Detection::new(PasteAttempt, "Paste action blocked"))
                    }
                }
            }
            InputSignal::ScriptDetected { src } => {
                if !self.seen_scripts.insert(src.clone()) {
                    return None;
                }
                Some(Detection::new(
                    ExternalScript,
                    format!("External script detected: {src}"),
                ))
            }
            InputSignal::Activity => {
                self.note_activity();
                None
            }
            InputSignal::Unload => Some(Detection::new(PageReload, "Reload or close detected")),
            InputSignal::BackNavigation => {
                Some(Detection::new(BackNavigation, "Back navigation detected"))
            }
            InputSignal::Resized { width, height } => {
                let previous = self.viewport.replace((*width, *height));
                let (w, h) = previous?;
                let exceeded = width.abs_diff(w) > self.resize_threshold_px
                    || height.abs_diff(h) > self.resize_threshold_px;
                (self.desktop && exceeded)
                    .then(|| Detection::new(ScreenResize, "Screen size changed"))
            }
        }
    }

    /// Classify and escalate one signal.
    pub fn observe(&mut self, signal: &InputSignal) -> Escalation {
        match self.classify(signal) {
            Some(detection) => self.escalate(detection),
            None => Escalation::None,
        }
    }

    /// Run a detection through the re-entrancy lock and the count policy.
    pub fn escalate(&mut self, detection: Detection) -> Escalation {
        if !self.active {
            return Escalation::None;
        }
        if self.locked_until.is_some_and(|until| self.elapsed < until) {
            tracing::debug!(kind = %detection.kind, "violation suppressed by re-entrancy lock");
            return Escalation::Suppressed(detection);
        }

        self.count += 1;
        self.locked_until = Some(self.elapsed + self.reentrancy_window);
        let count = self.count;

        if count >= self.limit {
            tracing::info!(kind = %detection.kind, count, "violation limit reached");
            self.deactivate();
            return Escalation::Terminate { detection, count };
        }

        let remaining_violations = self.limit - count;
        tracing::info!(kind = %detection.kind, count, remaining_violations, "violation warning");
        self.warning = Some(Warning {
            kind: detection.kind,
            count,
            remaining_violations,
            countdown: Countdown::new(self.freeze),
        });
        Escalation::Warn {
            detection,
            count,
            remaining_violations,
        }
    }

    /// The student acknowledged the warning.
    pub fn continue_after_warning(&mut self) -> Result<WarningLifted, ActionRejected> {
        let warning = self.warning.take().ok_or(ActionRejected::NoWarning)?;
        Ok(lifted(&warning))
    }

    pub fn tick(&mut self, elapsed: Duration) -> MonitorTick {
        let mut out = MonitorTick::default();
        if !self.active {
            return out;
        }
        self.elapsed += elapsed;

        if let Some(warning) = self.warning.as_mut() {
            let before = warning.countdown.remaining_secs();
            let expired = warning.countdown.advance(elapsed);
            out.countdown_changed = warning.countdown.remaining_secs() != before;
            if expired {
                out.lifted = self.warning.take().map(|w| lifted(&w));
            }
        }

        if !self.inactivity_check_interval.is_zero() && self.elapsed >= self.next_inactivity_check {
            self.next_inactivity_check = self.elapsed + self.inactivity_check_interval;
            if self.elapsed.saturating_sub(self.last_activity) >= self.inactivity_threshold {
                self.last_activity = self.elapsed;
                let minutes = self.inactivity_threshold.as_secs() / 60;
                out.inactivity = Some(self.escalate(Detection::new(
                    ViolationKind::Inactivity,
                    format!("Student inactive for more than {minutes} minutes"),
                )));
            }
        }

        out
    }
}

fn lifted(warning: &Warning) -> WarningLifted {
    WarningLifted {
        kind: warning.kind,
        request_fullscreen: warning.kind == ViolationKind::FullscreenExit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> IntegrityMonitor {
        IntegrityMonitor::new(&EngineConfig::default())
    }

    #[test]
    fn key_classification() {
        let kind = |k: KeyPress| classify_key(&k).map(|d| d.kind);
        assert_eq!(kind(KeyPress::plain("F5")), Some(ViolationKind::ReloadAttempt));
        assert_eq!(kind(KeyPress::ctrl("r")), Some(ViolationKind::ReloadAttempt));
        assert_eq!(kind(KeyPress::ctrl("W")), Some(ViolationKind::CloseAttempt));
        assert_eq!(kind(KeyPress::ctrl("a")), Some(ViolationKind::SelectAll));
        assert_eq!(kind(KeyPress::ctrl("t")), Some(ViolationKind::KeyboardShortcut));
        assert_eq!(kind(KeyPress::plain("F12")), Some(ViolationKind::DevTools));
        assert_eq!(kind(KeyPress::plain("PrintScreen")), Some(ViolationKind::ScreenshotAttempt));
        let devtools = KeyPress {
            shift: true,
            ..KeyPress::ctrl("I")
        };
        assert_eq!(kind(devtools), Some(ViolationKind::DevTools));
        let alt_tab = KeyPress {
            alt: true,
            ..KeyPress::plain("Tab")
        };
        assert_eq!(kind(alt_tab), Some(ViolationKind::AltTab));
        assert_eq!(kind(KeyPress::plain("a")), None);
        let paste_in_field = KeyPress {
            in_answer_field: true,
            ..KeyPress::ctrl("v")
        };
        assert_eq!(kind(paste_in_field), None);
    }

    #[test]
    fn allowed_inputs_are_not_violations() {
        let mut m = monitor();
        assert_eq!(m.observe(&InputSignal::ContextMenu { on_input: true }), Escalation::None);
        assert_eq!(
            m.observe(&InputSignal::Clipboard {
                action: ClipboardAction::Paste,
                in_answer_field: true
            }),
            Escalation::None
        );
        assert_eq!(m.observe(&InputSignal::Activity), Escalation::None);
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn two_signals_in_one_window_count_once() {
        let mut m = monitor();
        assert!(matches!(
            m.observe(&InputSignal::VisibilityHidden),
            Escalation::Warn { count: 1, .. }
        ));
        m.tick(Duration::from_millis(100));
        assert!(matches!(
            m.observe(&InputSignal::WindowBlur),
            Escalation::Suppressed(_)
        ));
        assert_eq!(m.count(), 1);
    }

    #[test]
    fn third_violation_terminates() {
        let mut m = monitor();
        for expected in 1..=2u32 {
            match m.observe(&InputSignal::FullscreenExited) {
                Escalation::Warn {
                    count,
                    remaining_violations,
                    ..
                } => {
                    assert_eq!(count, expected);
                    assert_eq!(remaining_violations, 3 - expected);
                }
                other => panic!("expected warning, got {other:?}"),
            }
            m.tick(Duration::from_millis(1200));
        }
        match m.observe(&InputSignal::FullscreenExited) {
            Escalation::Terminate { detection, count } => {
                assert_eq!(count, 3);
                assert_eq!(detection.kind, ViolationKind::FullscreenExit);
            }
            other => panic!("expected termination, got {other:?}"),
        }
        assert!(!m.is_active());
        assert_eq!(m.observe(&InputSignal::WindowBlur), Escalation::None);
    }

    #[test]
    fn freeze_lifts_after_countdown() {
        let mut m = monitor();
        m.observe(&InputSignal::FullscreenExited);
        assert!(m.is_frozen());
        assert_eq!(m.warning().unwrap().remaining_secs(), 20);
        let tick = m.tick(Duration::from_secs(19));
        assert!(tick.lifted.is_none());
        let tick = m.tick(Duration::from_secs(1));
        assert_eq!(
            tick.lifted,
            Some(WarningLifted {
                kind: ViolationKind::FullscreenExit,
                request_fullscreen: true
            })
        );
        assert!(!m.is_frozen());
    }

    #[test]
    fn continue_lifts_early_without_fullscreen_for_other_kinds() {
        let mut m = monitor();
        m.observe(&InputSignal::VisibilityHidden);
        let lifted = m.continue_after_warning().unwrap();
        assert!(!lifted.request_fullscreen);
        assert_eq!(m.continue_after_warning(), Err(ActionRejected::NoWarning));
    }

    #[test]
    fn scripts_are_reported_once() {
        let mut m = monitor();
        let signal = InputSignal::ScriptDetected {
            src: "https://cdn.example/inject.js".into(),
        };
        assert!(m.classify(&signal).is_some());
        assert!(m.classify(&signal).is_none());
    }

    #[test]
    fn resize_threshold_on_desktop_only() {
        let mut m = monitor();
        m.set_viewport(1280, 800);
        assert!(m.classify(&InputSignal::Resized { width: 1200, height: 800 }).is_none());
        assert!(m.classify(&InputSignal::Resized { width: 900, height: 800 }).is_some());

        let mut mobile = IntegrityMonitor::new(&EngineConfig {
            desktop: false,
            ..EngineConfig::default()
        });
        mobile.set_viewport(400, 800);
        assert!(mobile.classify(&InputSignal::Resized { width: 800, height: 400 }).is_none());
    }

    #[test]
    fn inactivity_is_checked_on_cadence() {
        let mut m = monitor();
        for _ in 0..4 {
            assert!(m.tick(Duration::from_secs(60)).inactivity.is_none());
        }
        let tick = m.tick(Duration::from_secs(60));
        match tick.inactivity {
            Some(Escalation::Warn { detection, .. }) => {
                assert_eq!(detection.kind, ViolationKind::Inactivity)
            }
            other => panic!("expected inactivity warning, got {other:?}"),
        }
    }

    #[test]
    fn activity_resets_inactivity() {
        let mut m = monitor();
        m.tick(Duration::from_secs(240));
        m.observe(&InputSignal::Activity);
        assert!(m.tick(Duration::from_secs(60)).inactivity.is_none());
        assert!(m.tick(Duration::from_secs(60)).inactivity.is_none());
    }
}
