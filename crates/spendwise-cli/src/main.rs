//! Spendwise CLI - Vietnamese transaction classifier
//!
//! Usage:
//!   spendwise init                      Initialize database and train the classifier
//!   spendwise classify "ăn trưa 50k"    Classify a transaction note
//!   spendwise correct 12 an_uong        Record the chosen category
//!   spendwise train --file extra.jsonl  Retrain from corrections and extra samples

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let paths = commands::Paths::resolve(
        cli.config.as_deref(),
        cli.db.as_deref(),
        cli.model_dir.as_deref(),
    )?;

    let command = match cli.command {
        Commands::Categories => return commands::cmd_categories(&paths.config),
        command => command,
    };

    let pipeline = commands::open_pipeline(&paths, &cli.user, cli.no_encrypt)?;

    match command {
        Commands::Init => commands::cmd_init(&pipeline, &paths, cli.no_encrypt).await,
        Commands::Classify { text, json } => {
            commands::cmd_classify(&pipeline, &text.join(" "), json)
                .await
                .map(|_| ())
        }
        Commands::Correct {
            sample_id,
            category_id,
        } => commands::cmd_correct(&pipeline, sample_id, &category_id).await,
        Commands::Train { file, no_seed } => {
            commands::cmd_train(&pipeline, file.as_deref(), !no_seed).await
        }
        Commands::Retrain => commands::cmd_train(&pipeline, None, true).await,
        Commands::Confusion => commands::cmd_confusion(&pipeline).await,
        Commands::Monitor { json } => commands::cmd_monitor(&pipeline, json),
        Commands::Cache { action } => match action {
            None | Some(CacheAction::Stats) => commands::cmd_cache_stats(&pipeline),
            Some(CacheAction::Clear) => commands::cmd_cache_clear(&pipeline),
        },
        Commands::Status => commands::cmd_status(&pipeline, &paths, cli.no_encrypt).await,
        Commands::Categories => commands::cmd_categories(&paths.config),
    }
}
