//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Spendwise - Classify Vietnamese transaction notes
#[derive(Parser)]
#[command(name = "spendwise")]
#[command(about = "On-device transaction classifier with remote fallback", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to the user override, then the built-in config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path (defaults to <data_dir>/spendwise.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Directory holding the saved model files (defaults to <data_dir>/model)
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    /// User whose cache and training log are used
    #[arg(short, long, default_value = "default", global = true)]
    pub user: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set SPENDWISE_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and train the classifier from the seed corpus
    Init,

    /// Classify a transaction note (e.g. "ăn trưa 50k")
    Classify {
        /// Note text; multiple words are joined with spaces
        #[arg(required = true)]
        text: Vec<String>,

        /// Print the full prediction as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record the category the user chose for a logged prediction
    Correct {
        /// Sample id printed by `classify`
        sample_id: i64,

        /// Chosen category id (see `spendwise categories`)
        category_id: String,
    },

    /// Retrain the classifier from corrected samples (Ctrl-C cancels)
    Train {
        /// Extra labeled samples, one JSON object per line: {"text": ..., "category_id": ...}
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Leave the built-in seed corpus out of the training set
        #[arg(long)]
        no_seed: bool,
    },

    /// Retrain from the training log and the seed corpus (same as `train` without flags)
    Retrain,

    /// Show how often predictions disagreed with user choices
    Confusion,

    /// Show rolling latency and accuracy statistics
    Monitor {
        /// Print the snapshots as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the prediction cache
    Cache {
        #[command(subcommand)]
        action: Option<CacheAction>,
    },

    /// List configured categories
    Categories,

    /// Show classifier, provider and storage status
    Status,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show entry and hit counts (default)
    Stats,

    /// Remove every cached prediction of the user
    Clear,
}
