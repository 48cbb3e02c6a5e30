//! The `proctor validate` command.

use std::path::PathBuf;

use anyhow::Result;

use proctor_core::parser::{load_bank_directory, parse_bank, validate_bank};

pub fn execute(bank_path: PathBuf) -> Result<()> {
    let banks = if bank_path.is_dir() {
        load_bank_directory(&bank_path)?
    } else {
        vec![parse_bank(&bank_path)?]
    };
    anyhow::ensure!(
        !banks.is_empty(),
        "no question banks found in {}",
        bank_path.display()
    );

    let mut total_warnings = 0;

    for bank in &banks {
        let title = if bank.title.is_empty() {
            bank.id.as_str()
        } else {
            bank.title.as_str()
        };
        println!(
            "Exam {}: {} ({} questions, {})",
            bank.id,
            title,
            bank.config.questions.len(),
            bank.status
        );

        let warnings = validate_bank(bank);
        for w in &warnings {
            let prefix = w
                .code
                .as_ref()
                .map(|code| format!("  [{code}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All question banks valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
