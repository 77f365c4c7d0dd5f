//! Retraining and confusion report command implementations

use std::path::Path;

use anyhow::{Context, Result};
use spendwise_core::config::{parse_labeled_jsonl, seed_corpus};
use spendwise_core::{ClassificationPipeline, Error, LabeledText};

use super::{truncate, CtrlCCancel};

/// Read a JSONL file of labeled samples
pub fn load_training_file(path: &Path) -> Result<Vec<LabeledText>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_labeled_jsonl(&content).with_context(|| format!("Invalid training file {}", path.display()))
}

/// Full retrain from the training log, plus the seed corpus and an optional file
pub async fn cmd_train(
    pipeline: &ClassificationPipeline,
    file: Option<&Path>,
    include_seed: bool,
) -> Result<()> {
    let mut extra = Vec::new();
    if include_seed {
        extra.extend(seed_corpus().context("Failed to load seed corpus")?);
    }
    if let Some(path) = file {
        let samples = load_training_file(path)?;
        println!("📄 Loaded {} samples from {}", samples.len(), path.display());
        extra.extend(samples);
    }

    println!("🧠 Training classifier (Ctrl-C to cancel)...");
    let cancel = CtrlCCancel::install();

    let summary = match pipeline.retrain_from_log(&extra, cancel.flag()).await {
        Ok(summary) => summary,
        Err(Error::Cancelled) => {
            println!("⏹  Training cancelled; the previous model is unchanged");
            return Ok(());
        }
        Err(e) => return Err(e).context("Training failed"),
    };

    println!();
    println!("📊 Training Results");
    println!("   ─────────────────────────────");
    println!("   Samples:     {}", summary.samples);
    println!("   Vocabulary:  {} words", summary.vocab_size);
    println!("   Categories:  {}", summary.num_labels);
    println!(
        "   Epochs:      {} ({} batches)",
        summary.report.epochs, summary.report.batches
    );
    println!("   Final loss:  {:.4}", summary.report.final_loss);
    println!("✅ Model saved");

    Ok(())
}

/// Print (predicted, chosen) disagreement counts
pub async fn cmd_confusion(pipeline: &ClassificationPipeline) -> Result<()> {
    let pairs = pipeline
        .confusion_pairs()
        .await
        .context("Failed to read confusion pairs")?;

    if pairs.is_empty() {
        println!("No corrections recorded yet.");
        return Ok(());
    }

    let total: i64 = pairs.iter().map(|p| p.count).sum();
    let agreed: i64 = pairs
        .iter()
        .filter(|p| p.predicted_category_id.as_deref() == Some(p.chosen_category_id.as_str()))
        .map(|p| p.count)
        .sum();

    println!();
    println!("{:<20} {:<20} {:>6}", "PREDICTED", "CHOSEN", "COUNT");
    println!("{}", "-".repeat(48));
    for pair in &pairs {
        let predicted = pair.predicted_category_id.as_deref().unwrap_or("(none)");
        let marker = if predicted == pair.chosen_category_id { "✓" } else { " " };
        println!(
            "{:<20} {:<20} {:>6} {}",
            truncate(predicted, 20),
            truncate(&pair.chosen_category_id, 20),
            pair.count,
            marker
        );
    }
    println!();
    println!(
        "Agreement: {}/{} ({:.1}%)",
        agreed,
        total,
        agreed as f64 / total as f64 * 100.0
    );

    Ok(())
}
