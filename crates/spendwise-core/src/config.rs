//! Layered configuration
//!
//! Resolution order:
//! 1. An explicit path (e.g. `--config`), if it exists
//! 2. The user override at `~/.local/share/spendwise/config.toml`
//! 3. The default compiled into the binary from `config/spendwise.toml`
//!
//! Every key is optional in the file. Anything missing keeps the value from
//! [`SpendwiseConfig::default`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Category, LabeledText};

/// Default configuration (embedded at compile time)
const DEFAULT_CONFIG: &str = include_str!("../../../config/spendwise.toml");

/// Built-in labeled phrases used to warm up an empty classifier
const SEED_CORPUS: &str = include_str!("../../../config/seed_corpus.jsonl");

/// Sequence classifier shape and training schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub max_sequence_length: usize,
    pub max_vocab_size: Option<usize>,
    pub embedding_dim: usize,
    pub hidden_units: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_sequence_length: 16,
            max_vocab_size: Some(5000),
            embedding_dim: 16,
            hidden_units: 32,
            epochs: 60,
            batch_size: 8,
            learning_rate: 0.03,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Model predictions must score strictly above this; the rest go to the remote tier
    pub min_confidence: f64,
    pub cache_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            cache_ttl: Duration::from_secs(168 * 3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearnerConfig {
    pub debounce: Duration,
    pub batch_size: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(3000),
            batch_size: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringConfig {
    pub latency_window: usize,
    pub accuracy_window: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            latency_window: 200,
            accuracy_window: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageConfig {
    /// Root for the database, model files and monitor log
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved data directory (platform default when not configured)
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("spendwise")))
            .unwrap_or_else(|| PathBuf::from(".spendwise"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("spendwise.db")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.data_dir().join("model")
    }

    pub fn monitor_path(&self) -> PathBuf {
        self.data_dir().join("monitor.json")
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpendwiseConfig {
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub learner: LearnerConfig,
    pub monitoring: MonitoringConfig,
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
    pub categories: Vec<Category>,
}

impl SpendwiseConfig {
    /// Load configuration (explicit path, then user override, then embedded default)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let content = match candidate {
            Some(p) if p.exists() => {
                debug!("Loading config from {}", p.display());
                fs::read_to_string(&p).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", p.display(), e))
                })?
            }
            _ => DEFAULT_CONFIG.to_string(),
        };

        Self::parse(&content)
    }

    /// The configuration compiled into the binary
    pub fn embedded() -> Result<Self> {
        Self::parse(DEFAULT_CONFIG)
    }

    /// Parse TOML content on top of the built-in defaults
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

        let mut config = Self::default();

        if let Some(c) = raw.classifier {
            let target = &mut config.classifier;
            if let Some(v) = c.max_sequence_length {
                target.max_sequence_length = v;
            }
            if c.max_vocab_size.is_some() {
                target.max_vocab_size = c.max_vocab_size;
            }
            if let Some(v) = c.embedding_dim {
                target.embedding_dim = v;
            }
            if let Some(v) = c.hidden_units {
                target.hidden_units = v;
            }
            if let Some(v) = c.epochs {
                target.epochs = v;
            }
            if let Some(v) = c.batch_size {
                target.batch_size = v;
            }
            if let Some(v) = c.learning_rate {
                target.learning_rate = v;
            }
            if let Some(v) = c.seed {
                target.seed = v;
            }
        }

        if let Some(p) = raw.pipeline {
            if let Some(v) = p.min_confidence {
                config.pipeline.min_confidence = v;
            }
            if let Some(hours) = p.cache_ttl_hours {
                config.pipeline.cache_ttl = Duration::from_secs(hours * 3600);
            }
        }

        if let Some(l) = raw.learner {
            if let Some(ms) = l.debounce_ms {
                config.learner.debounce = Duration::from_millis(ms);
            }
            if let Some(v) = l.batch_size {
                config.learner.batch_size = v;
            }
        }

        if let Some(m) = raw.monitoring {
            if let Some(v) = m.latency_window {
                config.monitoring.latency_window = v;
            }
            if let Some(v) = m.accuracy_window {
                config.monitoring.accuracy_window = v;
            }
        }

        if let Some(r) = raw.remote {
            if let Some(secs) = r.timeout_secs {
                config.remote.timeout = Duration::from_secs(secs);
            }
        }

        if let Some(s) = raw.storage {
            config.storage.data_dir = s.data_dir;
        }

        if let Some(categories) = raw.categories {
            config.categories = categories
                .into_iter()
                .map(|c| Category {
                    name: c.name.unwrap_or_else(|| c.id.clone()),
                    id: c.id,
                })
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        if c.max_sequence_length == 0 {
            return Err(Error::Config("max_sequence_length must be > 0".into()));
        }
        if c.embedding_dim == 0 || c.hidden_units == 0 {
            return Err(Error::Config(
                "embedding_dim and hidden_units must be > 0".into(),
            ));
        }
        if c.batch_size == 0 || self.learner.batch_size == 0 {
            return Err(Error::Config("batch sizes must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.pipeline.min_confidence) {
            return Err(Error::Config("min_confidence must be within 0..=1".into()));
        }
        Ok(())
    }
}

/// Parse JSON Lines of `{"text": ..., "category_id": ...}`
///
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_labeled_jsonl(content: &str) -> Result<Vec<LabeledText>> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(i, line)| {
            serde_json::from_str::<LabeledText>(line)
                .map_err(|e| Error::InvalidData(format!("line {}: {}", i + 1, e)))
        })
        .collect()
}

/// The seed corpus compiled into the binary
pub fn seed_corpus() -> Result<Vec<LabeledText>> {
    parse_labeled_jsonl(SEED_CORPUS)
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("spendwise").join("config.toml"))
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    classifier: Option<RawClassifier>,
    pipeline: Option<RawPipeline>,
    learner: Option<RawLearner>,
    monitoring: Option<RawMonitoring>,
    remote: Option<RawRemote>,
    storage: Option<RawStorage>,
    categories: Option<Vec<RawCategory>>,
}

#[derive(Debug, Deserialize)]
struct RawClassifier {
    max_sequence_length: Option<usize>,
    max_vocab_size: Option<usize>,
    embedding_dim: Option<usize>,
    hidden_units: Option<usize>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f32>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    min_confidence: Option<f64>,
    cache_ttl_hours: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawLearner {
    debounce_ms: Option<u64>,
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawMonitoring {
    latency_window: Option<usize>,
    accuracy_window: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawRemote {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    id: String,
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_corpus_uses_configured_categories() {
        let config = SpendwiseConfig::embedded().unwrap();
        let corpus = seed_corpus().unwrap();
        assert!(corpus.len() >= 30);
        for sample in &corpus {
            assert!(
                config.categories.iter().any(|c| c.id == sample.category_id),
                "unknown category {}",
                sample.category_id
            );
        }
    }

    #[test]
    fn test_parse_labeled_jsonl() {
        let parsed = parse_labeled_jsonl(
            "# comment\n{\"text\": \"phở\", \"category_id\": \"an_uong\"}\n\n",
        )
        .unwrap();
        assert_eq!(parsed, vec![LabeledText::new("phở", "an_uong")]);

        let err = parse_labeled_jsonl("{\"text\": \"x\"}").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_embedded_config_matches_defaults() {
        let config = SpendwiseConfig::embedded().unwrap();
        let defaults = SpendwiseConfig::default();

        assert_eq!(config.classifier, defaults.classifier);
        assert_eq!(config.pipeline, defaults.pipeline);
        assert_eq!(config.learner, defaults.learner);
        assert_eq!(config.monitoring, defaults.monitoring);
        assert_eq!(config.remote, defaults.remote);
        assert!(config.categories.iter().any(|c| c.id == "an_uong"));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = SpendwiseConfig::parse(
            r#"
            [learner]
            debounce_ms = 50

            [[categories]]
            id = "food"
            "#,
        )
        .unwrap();

        assert_eq!(config.learner.debounce, Duration::from_millis(50));
        assert_eq!(config.learner.batch_size, 5);
        assert_eq!(config.classifier.max_sequence_length, 16);
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].name, "food");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = SpendwiseConfig::parse("[pipeline]\nmin_confidence = 1.5\n");
        assert!(matches!(result, Err(Error::Config(_))));

        let result = SpendwiseConfig::parse("[classifier]\nmax_sequence_length = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_explicit_path_falls_back() {
        let config =
            SpendwiseConfig::load(Some(Path::new("/nonexistent/spendwise.toml"))).unwrap();
        assert_eq!(config.pipeline.min_confidence, 0.6);
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            data_dir: Some(PathBuf::from("/data/sw")),
        };
        assert_eq!(storage.db_path(), PathBuf::from("/data/sw/spendwise.db"));
        assert_eq!(storage.model_dir(), PathBuf::from("/data/sw/model"));
    }
}
