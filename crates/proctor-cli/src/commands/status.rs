//! The `proctor status` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use proctor_core::model::ExamStatus;
use proctor_core::traits::ExamSource;
use proctor_transport::config::load_config_from;
use proctor_transport::{FileExamSource, HttpBackend};

pub async fn execute(
    exam_id: String,
    bank: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;

    let source: Box<dyn ExamSource> = match bank.or(config.bank.clone()) {
        Some(path) => Box::new(FileExamSource::from_path(&path)?),
        None => {
            let base_url = config
                .base_url
                .as_deref()
                .context("no exam source: pass --bank or set base_url in proctor.toml")?;
            Box::new(HttpBackend::new(
                base_url,
                config.api_token.clone(),
                Some(config.request_timeout()),
            )?)
        }
    };

    let status = source
        .exam_status(&exam_id)
        .await
        .with_context(|| format!("failed to query exam '{exam_id}' via {}", source.name()))?;

    println!("{exam_id}: {status}");
    if status != ExamStatus::Active {
        println!("The exam is not open for attempts.");
    }
    Ok(())
}
