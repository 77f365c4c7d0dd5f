//! Classification and correction command implementations

use anyhow::{Context, Result};
use spendwise_core::pipeline::format_vnd;
use spendwise_core::{CachedPrediction, ClassificationPipeline, Direction};
use tracing::warn;

use super::ensure_ready;

/// Classify one note and print the suggestion
pub async fn cmd_classify(
    pipeline: &ClassificationPipeline,
    text: &str,
    json: bool,
) -> Result<CachedPrediction> {
    // Lower tiers still answer when the classifier cannot be prepared
    if let Err(e) = ensure_ready(pipeline).await {
        warn!("Classifier unavailable: {:#}", e);
    }

    let prediction = pipeline.classify(text).await;

    if json {
        let mut value = serde_json::to_value(&prediction)?;
        value["sample_id"] = serde_json::json!(prediction.sample_id);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(prediction);
    }

    println!();
    println!("💬 {}", prediction.message);
    println!("   ─────────────────────────────");
    match (&prediction.category_id, &prediction.category_name) {
        (Some(id), Some(name)) => println!("   Category:   {} ({})", name, id),
        (Some(id), None) => println!("   Category:   {}", id),
        _ => println!("   Category:   (none)"),
    }
    match prediction.amount {
        Some(amount) => println!("   Amount:     {}", format_vnd(amount)),
        None => println!("   Amount:     (none)"),
    }
    let direction = match prediction.io {
        Direction::In => "IN (income)",
        Direction::Out => "OUT (expense)",
    };
    println!("   Direction:  {}", direction);
    for (i, tx) in prediction.transactions.iter().enumerate() {
        println!(
            "   #{}:         {} {}",
            i + 1,
            tx.category_id.as_deref().unwrap_or("?"),
            tx.amount.map(format_vnd).unwrap_or_else(|| "?".to_string())
        );
    }
    println!(
        "   Source:     {} ({:.0}% confidence)",
        prediction.source,
        prediction.overall_confidence * 100.0
    );

    if let Some(id) = prediction.sample_id {
        println!();
        println!("   Wrong category? spendwise correct {} <category-id>", id);
    }

    Ok(prediction)
}

/// Record the user's chosen category and fine-tune on it right away
pub async fn cmd_correct(
    pipeline: &ClassificationPipeline,
    sample_id: i64,
    category_id: &str,
) -> Result<()> {
    if let Err(e) = ensure_ready(pipeline).await {
        warn!("Classifier unavailable, correction is logged only: {:#}", e);
    }

    pipeline
        .accept_correction(sample_id, category_id)
        .await
        .with_context(|| format!("Failed to correct sample {}", sample_id))?;
    println!("✅ Sample {} recorded as {}", sample_id, category_id);

    // A CLI process exits before the debounce timer would fire
    let report = pipeline.learner().drain().await;
    if report.applied > 0 {
        println!("   🧠 Classifier fine-tuned on {} correction(s)", report.applied);
    }
    if report.failed > 0 {
        println!(
            "   ⚠️  {} correction(s) could not be learned yet; run 'spendwise train'",
            report.failed
        );
    }

    Ok(())
}
