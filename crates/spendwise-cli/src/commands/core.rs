//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `Paths` - Resolved configuration and storage locations
//! - `open_db` / `open_pipeline` - Shared utilities to wire the pipeline
//! - `CtrlCCancel` - Cancels long-running training on Ctrl-C
//! - `cmd_init` - Initialize the database and the classifier

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use spendwise_core::config::{self, SpendwiseConfig};
use spendwise_core::{
    CancelFlag, ClassificationPipeline, Database, Error, ModelStore, Monitor, RemoteFallback,
    WarmUp,
};
use tracing::{debug, warn};

/// Configuration plus the storage locations derived from it and the CLI flags
pub struct Paths {
    pub config: SpendwiseConfig,
    pub db: PathBuf,
    pub model_dir: PathBuf,
    pub monitor: PathBuf,
}

impl Paths {
    pub fn resolve(
        config_path: Option<&Path>,
        db: Option<&Path>,
        model_dir: Option<&Path>,
    ) -> Result<Self> {
        let config = SpendwiseConfig::load(config_path).context("Failed to load configuration")?;

        let db = db
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.storage.db_path());
        let model_dir = model_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.storage.model_dir());
        let monitor = config.storage.monitor_path();

        Ok(Self {
            config,
            db,
            model_dir,
            monitor,
        })
    }
}

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow!("Database path is not valid UTF-8: {}", db_path.display()))?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Wire the classification pipeline for one user
pub fn open_pipeline(paths: &Paths, user: &str, no_encrypt: bool) -> Result<ClassificationPipeline> {
    let db = open_db(&paths.db, no_encrypt)?;
    let remote = RemoteFallback::from_env(&paths.config.remote);
    let monitor = Monitor::open(paths.config.monitoring.clone(), paths.monitor.clone());

    debug!(user, model_dir = %paths.model_dir.display(), "Opening pipeline");
    Ok(
        ClassificationPipeline::new(&paths.config, db, remote, user)
            .with_model_store(ModelStore::new(&paths.model_dir))
            .with_monitor(monitor),
    )
}

/// Cancel flag that is raised when the user presses Ctrl-C
///
/// The signal listener is stopped when this value is dropped.
pub struct CtrlCCancel {
    flag: CancelFlag,
    listener: tokio::task::JoinHandle<()>,
}

impl CtrlCCancel {
    pub fn install() -> Self {
        let flag = CancelFlag::new();
        let raised = flag.clone();
        let listener = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⏹  Cancelling...");
                raised.cancel();
            }
        });
        Self { flag, listener }
    }

    pub fn flag(&self) -> &CancelFlag {
        &self.flag
    }
}

impl Drop for CtrlCCancel {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Restore the saved model, or train from corrections plus the seed corpus
pub async fn ensure_ready(pipeline: &ClassificationPipeline) -> Result<WarmUp> {
    let seed = config::seed_corpus().context("Failed to load seed corpus")?;
    let cancel = CtrlCCancel::install();
    match pipeline.warm_up(&seed, cancel.flag()).await {
        Ok(outcome) => Ok(outcome),
        Err(Error::Cancelled) => Err(anyhow!("Warm-up cancelled")),
        Err(e) => Err(e).context("Failed to prepare the classifier"),
    }
}

pub async fn cmd_init(pipeline: &ClassificationPipeline, paths: &Paths, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing Spendwise...");
    println!("   Database: {}", paths.db.display());
    println!("   Model:    {}", paths.model_dir.display());

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    match ensure_ready(pipeline).await? {
        WarmUp::Restored => println!("   Restored saved classifier"),
        WarmUp::Trained(summary) => println!(
            "   Trained classifier on {} samples ({} words, {} categories)",
            summary.samples, summary.vocab_size, summary.num_labels
        ),
        WarmUp::Skipped => {
            warn!("No training data available");
            println!("   ⚠️  Classifier not trained (no training data)");
        }
    }

    println!("✅ Spendwise initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Classify a note: spendwise classify \"ăn trưa 50k\"");
    println!("  2. Correct a guess: spendwise correct <sample-id> <category-id>");

    Ok(())
}
