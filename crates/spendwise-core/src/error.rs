//! Error types for Spendwise

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Classifier is not ready")]
    NotReady,

    #[error("Category '{0}' has no label index")]
    UnmappedCategory(String),

    #[error("Label index {index} is outside the model's {labels} outputs")]
    LabelOutOfRange { index: usize, labels: usize },

    #[error("Training sample {0} already has a chosen category")]
    AlreadyCorrected(i64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Training error: {0}")]
    Training(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
