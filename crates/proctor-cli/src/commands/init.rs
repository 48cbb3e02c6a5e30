//! The `proctor init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("proctor.toml").exists() {
        println!("proctor.toml already exists, skipping.");
    } else {
        std::fs::write("proctor.toml", SAMPLE_CONFIG)?;
        println!("Created proctor.toml");
    }

    std::fs::create_dir_all("exams")?;
    let example_path = std::path::Path::new("exams/sample.toml");
    if example_path.exists() {
        println!("exams/sample.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, SAMPLE_BANK)?;
        println!("Created exams/sample.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit proctor.toml (set base_url to use an exam backend)");
    println!("  2. Run: proctor validate --bank exams/sample.toml");
    println!("  3. Run: proctor run SAMPLE1 --student-id s1 --bank exams/sample.toml");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# proctor configuration

# Exam backend. Leave unset to run from local question banks.
# base_url = "http://localhost:3000"
# api_token = "${PROCTOR_API_TOKEN}"
timeout_secs = 30

data_dir = ".proctor"
results_dir = "./proctor-results"
bank = "exams"

[engine]
violation_limit = 3
warning_freeze_secs = 20
reentrancy_window_ms = 800
review_grace_ms = 600
retry_interval_ms = 1500
offline_poll_ms = 1500
tamper_check_interval_secs = 20
inactivity_threshold_secs = 300
inactivity_check_interval_secs = 60
resize_threshold_px = 200
desktop = true
default_question_timeout_secs = 30
tick_ms = 250
"#;

const SAMPLE_BANK: &str = r#"[exam]
id = "SAMPLE1"
title = "Sample exam"
status = "active"
global_timeout_secs = 600
default_timeout_secs = 30

[[questions]]
code = "Q001"
prompt = "What is 7 x 8?"
answer = "56"

[[questions]]
code = "Q002"
prompt = "What is the chemical symbol for gold?"
answer = "Au"

[[questions]]
code = "Q003"
prompt = "How many sides does a hexagon have?"
answer = "6"
timeout_secs = 20
"#;
