//! proctor CLI: take a proctored exam in the terminal and manage question banks.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "proctor", version, about = "Proctored exam delivery engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take an exam interactively
    Run {
        /// Exam identifier
        exam_id: String,

        /// Student identifier
        #[arg(long)]
        student_id: String,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,

        /// Question bank file or directory (runs without a backend)
        #[arg(long)]
        bank: Option<PathBuf>,

        /// Directory for delivered results of local runs
        #[arg(long)]
        output: Option<PathBuf>,

        /// Directory of the durable session store
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seed for the question order
        #[arg(long)]
        seed: Option<u64>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate question bank TOML files
    Validate {
        /// Path to a bank file or directory
        #[arg(long)]
        bank: PathBuf,
    },

    /// Show whether an exam is open for attempts
    Status {
        exam_id: String,

        /// Question bank file or directory (instead of the backend)
        #[arg(long)]
        bank: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and a sample question bank
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("proctor=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            exam_id,
            student_id,
            first_name,
            last_name,
            bank,
            output,
            data_dir,
            seed,
            config,
        } => {
            commands::run::execute(commands::run::RunArgs {
                exam_id,
                student_id,
                first_name,
                last_name,
                bank,
                output,
                data_dir,
                seed,
                config,
            })
            .await
        }
        Commands::Validate { bank } => commands::validate::execute(bank),
        Commands::Status {
            exam_id,
            bank,
            config,
        } => commands::status::execute(exam_id, bank, config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
