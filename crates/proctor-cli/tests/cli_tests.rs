//! CLI integration tests using assert_cmd.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn proctor(home: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("proctor").unwrap();
    // Keep a developer's ~/.config/proctor out of the tests.
    cmd.env("HOME", home)
        .env_remove("PROCTOR_BASE_URL")
        .env_remove("PROCTOR_API_TOKEN");
    cmd
}

const TWO_QUESTIONS: &str = r#"
[exam]
id = "T1"
title = "Two questions"
default_timeout_secs = 60

[[questions]]
code = "Q001"
prompt = "Six times seven?"
answer = "42"

[[questions]]
code = "Q002"
prompt = "The answer to everything?"
answer = "42"
"#;

fn write_bank(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("bank.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    proctor(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn validate_sample_bank() {
    let dir = TempDir::new().unwrap();
    proctor(dir.path())
        .arg("validate")
        .arg("--bank")
        .arg("../../exams/algebra.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("6 questions"))
        .stdout(predicate::str::contains("All question banks valid"));
}

#[test]
fn validate_directory() {
    let dir = TempDir::new().unwrap();
    proctor(dir.path())
        .arg("validate")
        .arg("--bank")
        .arg("../../exams")
        .assert()
        .success()
        .stdout(predicate::str::contains("Algebra basics"))
        .stdout(predicate::str::contains("World capitals"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(
        &dir,
        r#"
[exam]
id = "BAD"

[[questions]]
code = "Q001"
prompt = "First"
answer = "a"

[[questions]]
code = "1"
prompt = "Duplicate of the first"
"#,
    );
    proctor(dir.path())
        .arg("validate")
        .arg("--bank")
        .arg(&bank)
        .assert()
        .success()
        .stdout(predicate::str::contains("duplicate code: Q001"))
        .stdout(predicate::str::contains("warning(s) found"));
}

#[test]
fn validate_nonexistent_file() {
    let dir = TempDir::new().unwrap();
    proctor(dir.path())
        .arg("validate")
        .arg("--bank")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    proctor(dir.path())
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created proctor.toml"))
        .stdout(predicate::str::contains("Created exams/sample.toml"));

    assert!(dir.path().join("proctor.toml").exists());

    // The generated bank validates cleanly.
    proctor(dir.path())
        .current_dir(dir.path())
        .arg("validate")
        .arg("--bank")
        .arg("exams/sample.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("All question banks valid"));

    // Running init again skips existing files.
    proctor(dir.path())
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn status_from_bank() {
    let dir = TempDir::new().unwrap();
    proctor(dir.path())
        .arg("status")
        .arg("GEO200")
        .arg("--bank")
        .arg("../../exams")
        .assert()
        .success()
        .stdout(predicate::str::contains("GEO200: draft"))
        .stdout(predicate::str::contains("not open for attempts"));
}

#[test]
fn status_without_source_fails() {
    let dir = TempDir::new().unwrap();
    proctor(dir.path())
        .current_dir(dir.path())
        .arg("status")
        .arg("ALG101")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no exam source"));
}

#[test]
fn run_completes_and_writes_result() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(&dir, TWO_QUESTIONS);
    let results = dir.path().join("results");

    proctor(dir.path())
        .current_dir(dir.path())
        .args(["run", "T1", "--student-id", "s1", "--first-name", "Ada"])
        .arg("--bank")
        .arg(&bank)
        .arg("--output")
        .arg(&results)
        .arg("--data-dir")
        .arg(dir.path().join("store"))
        .write_stdin("42\n42\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Questions 0/2"))
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("2/2"));

    let written: Vec<_> = std::fs::read_dir(&results)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("T1-s1-"))
        .collect();
    assert_eq!(written.len(), 1);

    // A second attempt by the same student is refused.
    proctor(dir.path())
        .current_dir(dir.path())
        .args(["run", "T1", "--student-id", "s1"])
        .arg("--bank")
        .arg(&bank)
        .arg("--output")
        .arg(&results)
        .arg("--data-dir")
        .arg(dir.path().join("store"))
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already been submitted"));
}

#[test]
fn run_abort_submits_nothing() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(&dir, TWO_QUESTIONS);
    let results = dir.path().join("results");

    proctor(dir.path())
        .current_dir(dir.path())
        .args(["run", "T1", "--student-id", "s2"])
        .arg("--bank")
        .arg(&bank)
        .arg("--output")
        .arg(&results)
        .arg("--data-dir")
        .arg(dir.path().join("store"))
        .write_stdin("42\n:abort\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("aborted"));

    assert!(!results.exists());
}

#[test]
fn run_refuses_inactive_exam() {
    let dir = TempDir::new().unwrap();
    proctor(dir.path())
        .current_dir(dir.path())
        .args(["run", "GEO200", "--student-id", "s1"])
        .arg("--bank")
        .arg(Path::new("../../exams").canonicalize().unwrap())
        .arg("--data-dir")
        .arg(dir.path().join("store"))
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not open for attempts"));
}
