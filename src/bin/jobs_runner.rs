//! CLI entry point for the nightly batch jobs: behavioral write-back,
//! persona EMA recompute, and BPR training-pair extraction.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tripcore_backend::{db::Db, jobs, Config};

#[derive(Parser)]
#[command(name = "tripcore-jobs", about = "Nightly batch job runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Target date for the run (YYYY-MM-DD). Defaults to yesterday (UTC).
    #[arg(long, global = true)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Command {
    /// Write accumulated behavioral signals back into derived trip state.
    WriteBack,
    /// Recompute persona dimension EMAs from the day's signals.
    PersonaUpdate,
    /// Export a BPR training-pair CSV for the target date.
    TrainingExtract,
    /// Run all three jobs in their normal nightly order.
    All,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripcore_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    let db = Db::open(&config.database_path).context("opening sqlite database")?;

    match cli.command {
        Command::WriteBack => {
            let result = jobs::run_write_back(&db, cli.date)?;
            tracing::info!(?result.status, rows_updated = result.rows_updated, "write_back complete");
        }
        Command::PersonaUpdate => {
            let result = jobs::run_persona_update(&db, cli.date)?;
            tracing::info!(?result.status, users_updated = result.users_updated, "persona_update complete");
        }
        Command::TrainingExtract => {
            let result = jobs::extract_training_data(&db, &config.training_output_dir, cli.date)?;
            tracing::info!(?result.status, rows_extracted = result.rows_extracted, "training_extract complete");
        }
        Command::All => {
            let write_back = jobs::run_write_back(&db, cli.date)?;
            tracing::info!(?write_back.status, rows_updated = write_back.rows_updated, "write_back complete");

            let persona_update = jobs::run_persona_update(&db, cli.date)?;
            tracing::info!(?persona_update.status, users_updated = persona_update.users_updated, "persona_update complete");

            let training_extract = jobs::extract_training_data(&db, &config.training_output_dir, cli.date)?;
            tracing::info!(?training_extract.status, rows_extracted = training_extract.rows_extracted, "training_extract complete");
        }
    }

    Ok(())
}
