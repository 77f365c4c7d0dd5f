//! JSON parsing helpers for remote provider responses
//!
//! Hosted models often wrap the JSON payload in prose or code fences, so the
//! outermost `{...}` is cut out before deserializing.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Direction, SubTransaction};

/// Classification returned by the remote tier
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteClassification {
    pub amount: Option<f64>,
    pub category_id: Option<String>,
    pub io: Option<Direction>,
    pub note: Option<String>,
    pub confidence: Option<f64>,
    pub date: Option<NaiveDate>,
    pub multiple: bool,
    pub transactions: Vec<SubTransaction>,
}

impl RemoteClassification {
    /// True when the provider recognised neither a category nor an amount
    pub fn is_empty(&self) -> bool {
        self.category_id.is_none() && self.amount.is_none() && self.transactions.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default, alias = "category", alias = "categoryId")]
    category_id: Option<String>,
    #[serde(default, alias = "direction", alias = "type")]
    io: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    multiple: Option<bool>,
    #[serde(default)]
    transactions: Vec<RawSubTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawSubTransaction {
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default, alias = "category", alias = "categoryId")]
    category_id: Option<String>,
    #[serde(default, alias = "direction", alias = "type")]
    io: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

/// Cut the outermost JSON object out of a model response
pub fn extract_json(response: &str) -> Result<&str> {
    let response = response.trim();
    let start = response.find('{');
    let end = response.rfind('}');

    match (start, end) {
        (Some(s), Some(e)) if s < e => Ok(&response[s..=e]),
        _ => Err(Error::InvalidData(format!(
            "No JSON found in provider response | Raw: {}",
            truncate(response)
        ))),
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "null")
}

/// Parse a classification from a provider response
pub fn parse_classification(response: &str) -> Result<RemoteClassification> {
    let json_str = extract_json(response)?;
    let raw: RawClassification = serde_json::from_str(json_str).map_err(|e| {
        Error::InvalidData(format!(
            "Invalid JSON from provider: {} | Raw: {}",
            e,
            truncate(json_str)
        ))
    })?;

    let transactions: Vec<SubTransaction> = raw
        .transactions
        .into_iter()
        .map(|t| SubTransaction {
            amount: t.amount.filter(|a| a.is_finite() && *a > 0.0),
            category_id: non_empty(t.category_id),
            io: t
                .io
                .and_then(|s| s.parse().ok())
                .unwrap_or(Direction::Out),
            note: non_empty(t.note),
        })
        .collect();

    Ok(RemoteClassification {
        amount: raw.amount.filter(|a| a.is_finite() && *a > 0.0),
        category_id: non_empty(raw.category_id),
        io: raw.io.and_then(|s| s.parse().ok()),
        note: non_empty(raw.note),
        confidence: raw.confidence.map(|c| c.clamp(0.0, 1.0)),
        date: raw
            .date
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
        multiple: raw.multiple.unwrap_or(false) || transactions.len() > 1,
        transactions,
    })
}
