//! Status-related command implementations (status, monitor, cache, categories)

use anyhow::{Context, Result};
use spendwise_core::db::DB_KEY_ENV;
use spendwise_core::{ClassificationPipeline, Database, ModelStore, SpendwiseConfig};
use tracing::warn;

use super::Paths;

pub async fn cmd_status(
    pipeline: &ClassificationPipeline,
    paths: &Paths,
    no_encrypt: bool,
) -> Result<()> {
    println!();
    println!("📊 Spendwise Status");
    println!("   ─────────────────────────────────────────────────────────────");
    println!("   User:     {}", pipeline.user_id());
    println!("   Database: {}", paths.db.display());

    if let Ok(metadata) = std::fs::metadata(&paths.db) {
        let size_kb = metadata.len() as f64 / 1024.0;
        if size_kb < 1024.0 {
            println!("   Size:     {:.1} KB", size_kb);
        } else {
            println!("   Size:     {:.1} MB", size_kb / 1024.0);
        }
    }

    let db = super::open_db(&paths.db, no_encrypt)?;
    println!("   {}", encryption_line(&db)?);

    // Restore only; status never trains
    let store = ModelStore::new(&paths.model_dir);
    if let Err(e) = pipeline.classifier().restore(&store).await {
        warn!("Saved model could not be read: {}", e);
    }
    let info = pipeline.classifier().info().await;
    println!();
    println!("   Model dir:   {}", paths.model_dir.display());
    if info.ready {
        println!(
            "   Classifier:  ready ({} words, {} categories, {} fine-tunes)",
            info.vocab_size, info.num_labels, info.fine_tunes
        );
    } else {
        println!("   Classifier:  not trained (run 'spendwise init')");
    }

    println!();
    let health = pipeline.remote().health();
    if health.is_empty() {
        println!("   Remote fallback: disabled");
        println!("   💡 Tip: Set SPENDWISE_CHAT_API_KEY or SPENDWISE_TEXTGEN_API_KEY");
    } else {
        println!("   Remote fallback:");
        for provider in health {
            println!(
                "     {:<18} {} ok / {} failed",
                provider.name, provider.successes, provider.failures
            );
        }
    }

    let cache = pipeline.cache().stats(&pipeline.user_id())?;
    println!();
    println!(
        "   Cache:       {} entries, {} hits",
        cache.entries, cache.total_hits
    );

    println!();
    Ok(())
}

/// Status line for the database as actually opened
pub fn encryption_line(db: &Database) -> Result<String> {
    let encrypted = db
        .is_encrypted()
        .context("Failed to check database encryption")?;
    Ok(if encrypted {
        format!("🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV)
    } else {
        "⚠️  Encryption: DISABLED".to_string()
    })
}

pub fn cmd_monitor(pipeline: &ClassificationPipeline, json: bool) -> Result<()> {
    let latency = pipeline.monitor().latency_snapshot();
    let accuracy = pipeline.monitor().accuracy_snapshot();

    if json {
        let value = serde_json::json!({
            "latency": latency,
            "accuracy": accuracy,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    println!("⏱  Latency (last {} classifications)", latency.count);
    if latency.count == 0 {
        println!("   No classifications recorded yet.");
    } else {
        println!("   Mean: {:.1} ms", latency.mean_ms);
        println!("   p50:  {:.1} ms", latency.p50_ms);
        println!("   p95:  {:.1} ms", latency.p95_ms);
        println!("   Max:  {:.1} ms", latency.max_ms);
        for (source, count) in &latency.by_source {
            println!("   {:<10} {}", source, count);
        }
    }

    println!();
    println!("🎯 Accuracy (last {} corrections)", accuracy.total);
    match accuracy.accuracy {
        Some(rate) => println!(
            "   {}/{} correct ({:.1}%)",
            accuracy.correct,
            accuracy.total,
            rate * 100.0
        ),
        None => println!("   No corrections recorded yet."),
    }

    Ok(())
}

pub fn cmd_cache_stats(pipeline: &ClassificationPipeline) -> Result<()> {
    let user = pipeline.user_id();
    let stats = pipeline
        .cache()
        .stats(&user)
        .context("Failed to read cache stats")?;

    println!("Cache for {}:", user);
    println!("  Entries:  {}", stats.entries);
    println!("  Hits:     {}", stats.total_hits);
    println!("  TTL:      {} hours", pipeline.cache().ttl().as_secs() / 3600);

    Ok(())
}

pub fn cmd_cache_clear(pipeline: &ClassificationPipeline) -> Result<()> {
    let user = pipeline.user_id();
    let removed = pipeline
        .cache()
        .clear(&user)
        .context("Failed to clear cache")?;
    println!("🗑  Removed {} cached prediction(s) for {}", removed, user);
    Ok(())
}

pub fn cmd_categories(config: &SpendwiseConfig) -> Result<()> {
    println!("{:<16} NAME", "ID");
    println!("{}", "-".repeat(36));
    for category in &config.categories {
        println!("{:<16} {}", category.id, category.name);
    }
    Ok(())
}
