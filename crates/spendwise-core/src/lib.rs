//! Spendwise Core Library
//!
//! Classifies Vietnamese transaction notes ("ăn trưa 50k") into a category,
//! an amount and a direction, and keeps improving from user corrections:
//! - Layered resolution pipeline (cache, on-device model, remote LLM, extractor)
//! - Tokenizer, vocabulary and a small recurrent sequence classifier
//! - Versioned model files with vocabulary-hash integrity checks
//! - Deterministic Vietnamese amount/direction extraction
//! - Encrypted SQLite training log and prediction cache
//! - Debounced adaptive learner for correction-driven fine-tuning
//! - Rolling latency/accuracy monitoring

pub mod ai;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod extract;
pub mod learner;
pub mod models;
pub mod monitor;
pub mod persist;
pub mod pipeline;
pub mod scheduler;
pub mod text;

/// Test utilities including the mock LLM provider server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{LlmProvider, MockProvider, ProviderClient, RemoteFallback};
pub use cache::{CacheHit, PredictionCache};
pub use classifier::{
    CancelFlag, CategoryIndexMap, ClassifierInfo, ModelStore, Prediction, SequenceClassifier,
    TrainingSummary,
};
pub use config::SpendwiseConfig;
pub use db::{CacheStats, Database, TrainingLog};
pub use directory::{CategoryDirectory, StaticCategoryDirectory};
pub use error::{Error, Result};
pub use extract::{AmountExtractor, Extraction};
pub use learner::{AdaptiveLearner, FlushReport, LearnerStats};
pub use models::{
    CachedPrediction, Category, ConfusionPair, Correction, Direction, LabeledText,
    PredictionSource, TrainingSample,
};
pub use monitor::{AccuracySnapshot, LatencySnapshot, Monitor};
pub use pipeline::{ClassificationPipeline, WarmUp};
pub use scheduler::Debouncer;
pub use text::{normalize, text_to_sequence, tokenize, Tokenizer, Vocabulary};
