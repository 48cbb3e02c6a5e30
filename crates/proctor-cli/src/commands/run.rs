//! The `proctor run` command.
//!
//! Each stdin line is one input: free text submits an answer, lines starting
//! with `:` are commands (see [`HELP`]).

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use proctor_core::integrity::{ClipboardAction, InputSignal, KeyPress};
use proctor_core::model::{Identity, Phase, QuestionView, Severity, ViolationRecord};
use proctor_core::observer::{SessionObserver, WarningView};
use proctor_core::runner::{AttemptOutcome, AttemptRunner};
use proctor_core::session::{ExamEvent, UserAction};
use proctor_core::submission::SubmissionStatus;
use proctor_transport::config::load_config_from;
use proctor_transport::{FileExamSource, FileResultSink, FileStore, HttpBackend, LogViolationSink};

const HELP: &str = "\
Type an answer and press Enter to submit it. Commands:
  :draft TEXT        keep TEXT as the answer if time runs out
  :skip              skip the current question
  :requeue CODE      bring a skipped question back now
  :continue          continue after a warning or resume after a reload
  :exit              leave the exam while a warning is shown
  :abort             abandon the attempt without submitting
  :signal NAME [ARG] simulate a page event (hidden, blur, fullscreen-exit,
                     key COMBO, context-menu [input], copy|paste|cut [field],
                     script SRC, activity, unload, back, resize WxH)";

pub struct RunArgs {
    pub exam_id: String,
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub bank: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub config: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    anyhow::ensure!(
        !args.student_id.trim().is_empty(),
        "student id must not be empty"
    );

    let config = load_config_from(args.config.as_deref())?;
    let engine = config.engine.to_engine_config()?;
    let data_dir = args.data_dir.unwrap_or_else(|| config.data_dir.clone());
    let store = Arc::new(FileStore::open(&data_dir)?);

    let identity = Identity {
        student_id: args.student_id.trim().to_string(),
        first_name: args.first_name,
        last_name: args.last_name,
    };

    let mut runner = match args.bank.or_else(|| config.bank.clone()) {
        Some(bank) => {
            tracing::info!(bank = %bank.display(), "running from local question bank");
            let results_dir = args.output.unwrap_or_else(|| config.results_dir.clone());
            let source = Arc::new(FileExamSource::from_path(&bank)?);
            AttemptRunner::new(
                source,
                Arc::new(FileResultSink::new(&results_dir)),
                Arc::new(LogViolationSink::new(Some(
                    results_dir.join("violations.jsonl"),
                ))),
                store,
                engine,
            )
        }
        None => {
            let base_url = config
                .base_url
                .as_deref()
                .context("no exam source: pass --bank or set base_url in proctor.toml")?;
            tracing::info!(base_url, "running against exam backend");
            let backend = Arc::new(HttpBackend::new(
                base_url,
                config.api_token.clone(),
                Some(config.request_timeout()),
            )?);
            AttemptRunner::new(
                backend.clone(),
                backend.clone(),
                backend.clone(),
                store,
                engine,
            )
            .with_connectivity(backend)
        }
    };
    if let Some(seed) = args.seed {
        runner = runner.with_seed(seed);
    }

    eprintln!("proctor v{}: exam {}", env!("CARGO_PKG_VERSION"), args.exam_id);
    eprintln!("{HELP}\n");

    let (tx, rx) = mpsc::channel(64);
    spawn_input_reader(tx);

    let observer = ConsoleObserver::default();
    let outcome = runner.run(&args.exam_id, &identity, rx, &observer).await?;
    print_summary(&args.exam_id, &identity, &outcome);
    Ok(())
}

/// Read stdin on a plain thread so a pending read never holds up shutdown.
fn spawn_input_reader(tx: mpsc::Sender<ExamEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Ok(Some(event)) => {
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(msg) => eprintln!("{msg}"),
            }
        }
    });
}

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<ExamEvent>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix(':') else {
        return Ok(Some(ExamEvent::Action(UserAction::Submit(line.to_string()))));
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let event = match name {
        "draft" => ExamEvent::Action(UserAction::Draft(rest.to_string())),
        "skip" => ExamEvent::Action(UserAction::Skip),
        "requeue" if !rest.is_empty() => ExamEvent::Action(UserAction::Requeue(rest.to_string())),
        "requeue" => return Err("usage: :requeue CODE".into()),
        "continue" => ExamEvent::Action(UserAction::ContinueAfterWarning),
        "exit" => ExamEvent::Action(UserAction::ExitDuringWarning),
        "abort" => ExamEvent::Abort,
        "signal" => ExamEvent::Signal(parse_signal(rest)?),
        "help" => {
            eprintln!("{HELP}");
            return Ok(None);
        }
        other => return Err(format!("unknown command ':{other}', type :help")),
    };
    Ok(Some(event))
}

fn parse_signal(spec: &str) -> Result<InputSignal, String> {
    let (name, arg) = match spec.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (spec, ""),
    };
    let clipboard = |action| InputSignal::Clipboard {
        action,
        in_answer_field: arg == "field",
    };

    let signal = match name {
        "hidden" => InputSignal::VisibilityHidden,
        "blur" => InputSignal::WindowBlur,
        "fullscreen-exit" => InputSignal::FullscreenExited,
        "key" => InputSignal::Key(parse_key_combo(arg)?),
        "context-menu" => InputSignal::ContextMenu {
            on_input: arg == "input",
        },
        "copy" => clipboard(ClipboardAction::Copy),
        "paste" => clipboard(ClipboardAction::Paste),
        "cut" => clipboard(ClipboardAction::Cut),
        "script" if !arg.is_empty() => InputSignal::ScriptDetected {
            src: arg.to_string(),
        },
        "activity" => InputSignal::Activity,
        "unload" => InputSignal::Unload,
        "back" => InputSignal::BackNavigation,
        "resize" => {
            let (w, h) = arg
                .split_once('x')
                .ok_or_else(|| "usage: :signal resize WIDTHxHEIGHT".to_string())?;
            InputSignal::Resized {
                width: w.trim().parse().map_err(|_| format!("invalid width '{w}'"))?,
                height: h.trim().parse().map_err(|_| format!("invalid height '{h}'"))?,
            }
        }
        "" => return Err("usage: :signal NAME [ARG]".into()),
        other => return Err(format!("unknown signal '{other}'")),
    };
    Ok(signal)
}

/// Parse `ctrl+shift+i`, `cmd+r`, `F12`.
fn parse_key_combo(combo: &str) -> Result<KeyPress, String> {
    let mut parts: Vec<&str> = combo.split('+').map(str::trim).collect();
    let key = parts
        .pop()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| "usage: :signal key COMBO (e.g. ctrl+c)".to_string())?;

    let mut press = KeyPress::plain(key);
    for modifier in parts {
        match modifier.to_lowercase().as_str() {
            "ctrl" | "control" => press.ctrl = true,
            "alt" | "option" => press.alt = true,
            "shift" => press.shift = true,
            "meta" | "cmd" | "win" => press.meta = true,
            other => return Err(format!("unknown modifier '{other}'")),
        }
    }
    Ok(press)
}

/// Prints the attempt to the terminal.
#[derive(Default)]
struct ConsoleObserver {
    /// Violation count of the warning last printed in full.
    shown_warning: Mutex<Option<u32>>,
}

impl SessionObserver for ConsoleObserver {
    fn on_question(&self, view: &QuestionView) {
        let position = match (view.phase, view.ordinal) {
            (Phase::Review, _) => "review".to_string(),
            (_, Some(n)) => format!("#{n}"),
            (_, None) => String::new(),
        };
        println!("\n[{}] {} {}", view.code, position, view.prompt);
        let mut status = format!("  {} | {}s", view.progress, view.remaining_secs);
        if view.skipped_pending > 0 {
            status.push_str(&format!(" | {} skipped", view.skipped_pending));
        }
        if view.can_skip {
            status.push_str(" | :skip allowed");
        }
        println!("{status}");
    }

    fn on_timer(&self, question_secs: Option<u64>, global_secs: Option<u64>) {
        if matches!(question_secs, Some(10) | Some(5)) {
            eprintln!("  {}s left on this question", question_secs.unwrap_or_default());
        }
        if matches!(global_secs, Some(60)) {
            eprintln!("  one minute left in the exam");
        }
    }

    fn on_review_started(&self, pending: usize) {
        println!("\nReview: {pending} skipped question(s) to answer");
    }

    fn on_violation(&self, record: &ViolationRecord, severity: Severity) {
        println!(
            "! Violation #{}: {} [{:?}]",
            record.sequence_number, record.description, severity
        );
    }

    fn on_warning(&self, warning: &WarningView) {
        let Ok(mut shown) = self.shown_warning.lock() else {
            return;
        };
        if *shown == Some(warning.count) {
            return;
        }
        *shown = Some(warning.count);
        println!(
            "!! WARNING: {} ({} violation(s), {} more ends the exam). Input frozen for {}s; :continue or :exit.",
            warning.description, warning.count, warning.remaining_violations, warning.remaining_secs
        );
    }

    fn on_warning_cleared(&self, request_fullscreen: bool) {
        if request_fullscreen {
            println!("Warning lifted. Please return to full screen.");
        } else {
            println!("Warning lifted.");
        }
    }

    fn on_resume_prompt(&self) {
        println!("An unfinished attempt was found. Type :continue to resume it.");
    }

    fn on_submission_status(&self, status: &SubmissionStatus) {
        match status {
            SubmissionStatus::WaitingForConnection => {
                println!("Offline. Waiting for a connection to submit...")
            }
            SubmissionStatus::Submitting { attempt } => {
                println!("Submitting result (attempt {attempt})...")
            }
            SubmissionStatus::Retrying { attempt, error } => {
                println!("Submission attempt {attempt} failed: {error}. Retrying...")
            }
            SubmissionStatus::Submitted { attempts } => {
                println!("Result submitted after {attempts} attempt(s).")
            }
        }
    }
}

fn print_summary(exam_id: &str, identity: &Identity, outcome: &AttemptOutcome) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec!["Exam", "Student", "Outcome", "Score", "Violations", "Deliveries"]);

    let score = outcome
        .payload
        .as_ref()
        .map(|p| p.score.to_string())
        .unwrap_or_else(|| "-".to_string());
    let student = match identity.display_name() {
        name if name.is_empty() => identity.student_id.clone(),
        name => name,
    };
    table.add_row(vec![
        Cell::new(exam_id),
        Cell::new(student),
        Cell::new(outcome.reason.to_string()),
        Cell::new(score),
        Cell::new(outcome.violations.len()),
        Cell::new(outcome.delivery_attempts),
    ]);

    println!("\n{table}");

    if let Some(payload) = &outcome.payload {
        if !payload.mistake_list.is_empty() {
            let mistakes: Vec<String> = payload.mistake_list.iter().map(|m| m.to_string()).collect();
            println!("Incorrect: {}", mistakes.join(", "));
        }
    }
}
