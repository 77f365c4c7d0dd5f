//! Data models for Spendwise

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Money flow direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Money coming in (salary, refund, sale)
    #[serde(rename = "IN")]
    In,
    /// Money going out (the common case)
    #[serde(rename = "OUT")]
    #[default]
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "IN" | "INCOME" | "INFLOW" => Ok(Self::In),
            "OUT" | "EXPENSE" | "OUTFLOW" => Ok(Self::Out),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which tier produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    /// Served from the prediction cache
    Cache,
    /// On-device sequence classifier
    Model,
    /// Remote language model fallback
    Llm,
    /// Deterministic amount/direction extractor only
    Extractor,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Model => "model",
            Self::Llm => "llm",
            Self::Extractor => "extractor",
        }
    }

    pub fn all() -> &'static [PredictionSource] {
        &[Self::Cache, Self::Model, Self::Llm, Self::Extractor]
    }
}

impl std::str::FromStr for PredictionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cache" => Ok(Self::Cache),
            "model" => Ok(Self::Model),
            "llm" => Ok(Self::Llm),
            "extractor" => Ok(Self::Extractor),
            _ => Err(format!("Unknown prediction source: {}", s)),
        }
    }
}

impl std::fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One transaction inside a multi-transaction input ("cafe 30k, xăng 50k")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTransaction {
    pub amount: Option<f64>,
    pub category_id: Option<String>,
    #[serde(default)]
    pub io: Direction,
    #[serde(default)]
    pub note: Option<String>,
}

/// Fully resolved answer for one input text
///
/// This is the payload stored in the prediction cache. `sample_id` is the
/// training-log row created for this particular prediction event and is never
/// persisted with the cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPrediction {
    pub amount: Option<f64>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub io: Direction,
    /// Top-label probability from the model tier (or the provider's own score)
    pub confidence: Option<f64>,
    pub note: Option<String>,
    pub date: Option<NaiveDate>,
    /// True when the input describes more than one transaction
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub transactions: Vec<SubTransaction>,
    /// Human-readable suggestion text
    pub message: String,
    pub overall_confidence: f64,
    pub source: PredictionSource,
    #[serde(skip)]
    pub sample_id: Option<i64>,
}

impl CachedPrediction {
    /// Minimal result returned when no tier produced anything usable
    pub fn placeholder(text: &str) -> Self {
        let note = text.trim();
        Self {
            amount: None,
            category_id: None,
            category_name: None,
            io: Direction::Out,
            confidence: None,
            note: (!note.is_empty()).then(|| note.to_string()),
            date: None,
            multiple: false,
            transactions: Vec::new(),
            message: "Could not recognise an amount or category".to_string(),
            overall_confidence: 0.0,
            source: PredictionSource::Extractor,
            sample_id: None,
        }
    }

    /// True when this is the placeholder (nothing was recognised)
    pub fn is_placeholder(&self) -> bool {
        self.amount.is_none() && self.category_id.is_none() && self.transactions.is_empty()
    }
}

/// A row of the append-only training log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub id: i64,
    pub user_id: String,
    pub text: String,
    pub amount: Option<f64>,
    pub io: Direction,
    pub predicted_category_id: Option<String>,
    pub chosen_category_id: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// New training-log row (before insertion)
#[derive(Debug, Clone)]
pub struct NewTrainingSample {
    pub user_id: String,
    pub text: String,
    pub amount: Option<f64>,
    pub io: Direction,
    pub predicted_category_id: Option<String>,
    pub confidence: Option<f64>,
}

/// Count of one (predicted, chosen) disagreement pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionPair {
    pub predicted_category_id: Option<String>,
    pub chosen_category_id: String,
    pub count: i64,
}

/// Text with its known category, used for bulk training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledText {
    pub text: String,
    pub category_id: String,
}

impl LabeledText {
    pub fn new(text: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category_id: category_id.into(),
        }
    }
}

/// A user correction waiting in the adaptive learner's queue
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub text: String,
    pub category_id: String,
    pub sample_id: Option<i64>,
}

/// Spending category as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}
