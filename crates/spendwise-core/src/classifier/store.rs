//! On-disk model artifacts
//!
//! Three files live in the model directory:
//! - `model.json` - network weights, label map and sequence length
//! - `vocab.json` - flat token → id mapping
//! - `metadata.json` - `{version, saved_at, vocab_hash}`
//!
//! Each is written and read independently so a model saved against a
//! different vocabulary (or by an incompatible build) is detected on load and
//! discarded instead of used.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::labels::CategoryIndexMap;
use super::network::SequenceModel;
use crate::error::Result;
use crate::persist::{read_json, write_json_atomic};
use crate::text::Vocabulary;

/// Bumped whenever the persisted model layout changes
pub const MODEL_FORMAT_VERSION: u32 = 1;

const MODEL_FILE: &str = "model.json";
const VOCAB_FILE: &str = "vocab.json";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub vocab_hash: String,
}

/// Contents of `model.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    pub network: SequenceModel,
    pub labels: CategoryIndexMap,
    pub max_sequence_length: usize,
}

/// Everything needed to make a classifier ready
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub model: PersistedModel,
    pub vocab: Vocabulary,
}

/// Model directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn save_model(&self, model: &PersistedModel) -> Result<()> {
        write_json_atomic(&self.path(MODEL_FILE), model)
    }

    pub fn load_model(&self) -> Result<Option<PersistedModel>> {
        read_json(&self.path(MODEL_FILE))
    }

    pub fn save_vocab(&self, vocab: &Vocabulary) -> Result<()> {
        vocab.save(&self.path(VOCAB_FILE))
    }

    pub fn load_vocab(&self) -> Result<Option<Vocabulary>> {
        Vocabulary::load(&self.path(VOCAB_FILE))
    }

    pub fn save_metadata(&self, metadata: &ModelMetadata) -> Result<()> {
        write_json_atomic(&self.path(METADATA_FILE), metadata)
    }

    pub fn load_metadata(&self) -> Result<Option<ModelMetadata>> {
        read_json(&self.path(METADATA_FILE))
    }

    /// Write vocabulary, weights and finally metadata
    pub fn save(&self, snapshot: &ModelSnapshot) -> Result<ModelMetadata> {
        self.save_vocab(&snapshot.vocab)?;
        self.save_model(&snapshot.model)?;

        let metadata = ModelMetadata {
            version: MODEL_FORMAT_VERSION,
            saved_at: Utc::now(),
            vocab_hash: snapshot.vocab.hash(),
        };
        self.save_metadata(&metadata)?;

        debug!(
            dir = %self.dir.display(),
            labels = snapshot.model.labels.len(),
            vocab = snapshot.vocab.len(),
            "Saved model"
        );
        Ok(metadata)
    }

    /// Load a consistent snapshot
    ///
    /// Returns `Ok(None)` when nothing is saved yet, and also when the saved
    /// artifacts fail an integrity check (the stale weights are removed so the
    /// next start does not trip over them again).
    pub fn load(&self) -> Result<Option<ModelSnapshot>> {
        let metadata = match self.load_metadata() {
            Ok(Some(m)) => m,
            Ok(None) => {
                debug!(dir = %self.dir.display(), "No saved model metadata");
                return Ok(None);
            }
            Err(e) => {
                warn!("Unreadable model metadata, discarding model: {}", e);
                self.discard()?;
                return Ok(None);
            }
        };

        let vocab = match self.load_vocab() {
            Ok(Some(v)) => v,
            Ok(None) => {
                warn!("Model metadata present but vocabulary missing, discarding model");
                self.discard()?;
                return Ok(None);
            }
            Err(e) => {
                warn!("Unreadable vocabulary, discarding model: {}", e);
                self.discard()?;
                return Ok(None);
            }
        };

        if metadata.version != MODEL_FORMAT_VERSION {
            warn!(
                saved = metadata.version,
                current = MODEL_FORMAT_VERSION,
                "Model format changed, discarding model"
            );
            self.discard()?;
            return Ok(None);
        }

        if metadata.vocab_hash != vocab.hash() {
            warn!("Vocabulary hash mismatch, discarding model");
            self.discard()?;
            return Ok(None);
        }

        let model = match self.load_model() {
            Ok(Some(m)) => m,
            Ok(None) => {
                warn!("Model weights missing, discarding metadata");
                self.discard()?;
                return Ok(None);
            }
            Err(e) => {
                warn!("Unreadable model weights, discarding model: {}", e);
                self.discard()?;
                return Ok(None);
            }
        };

        if let Err(e) = model.network.validate() {
            warn!("Model failed validation, discarding: {}", e);
            self.discard()?;
            return Ok(None);
        }

        let rows = model.network.shape().vocab_rows;
        if rows != vocab.embedding_rows() || model.max_sequence_length == 0 {
            warn!(
                model_rows = rows,
                vocab_rows = vocab.embedding_rows(),
                "Model and vocabulary sizes disagree, discarding model"
            );
            self.discard()?;
            return Ok(None);
        }

        Ok(Some(ModelSnapshot { model, vocab }))
    }

    /// Remove weights and metadata (the vocabulary is rebuilt by the next training run)
    pub fn discard(&self) -> Result<()> {
        for file in [MODEL_FILE, METADATA_FILE] {
            match fs::remove_file(self.path(file)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::network::ModelShape;
    use crate::classifier::rng::Rng;
    use tempfile::TempDir;

    fn snapshot() -> ModelSnapshot {
        let vocab = Vocabulary::build(["ăn trưa", "grab về nhà"], None);
        let shape = ModelShape {
            vocab_rows: vocab.embedding_rows(),
            embedding_dim: 4,
            hidden_units: 4,
            num_labels: 2,
        };
        let network = SequenceModel::new(shape, &mut Rng::new(1)).unwrap();
        ModelSnapshot {
            model: PersistedModel {
                network,
                labels: CategoryIndexMap::from_ids(["an_uong", "di_chuyen"]),
                max_sequence_length: 8,
            },
            vocab,
        }
    }

    #[test]
    fn test_load_empty_dir() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path().join("model"));
        let original = snapshot();

        let metadata = store.save(&original).unwrap();
        assert_eq!(metadata.version, MODEL_FORMAT_VERSION);
        assert_eq!(metadata.vocab_hash, original.vocab.hash());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.vocab, original.vocab);
        assert_eq!(loaded.model.labels, original.model.labels);
        assert_eq!(
            loaded.model.network.predict(&[2, 3]),
            original.model.network.predict(&[2, 3])
        );
    }

    #[test]
    fn test_vocab_hash_mismatch_discards() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&snapshot()).unwrap();

        // Simulate an update that shipped a different vocabulary
        let other = Vocabulary::build(["một từ khác"], None);
        store.save_vocab(&other).unwrap();

        assert!(store.load().unwrap().is_none());
        assert!(store.load_metadata().unwrap().is_none());
        assert!(store.load_model().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_weights_discarded() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&snapshot()).unwrap();

        fs::write(dir.path().join(MODEL_FILE), "{\"truncated\":").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_old_format_discarded() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&snapshot()).unwrap();

        let mut metadata = store.load_metadata().unwrap().unwrap();
        metadata.version = MODEL_FORMAT_VERSION + 1;
        store.save_metadata(&metadata).unwrap();

        assert!(store.load().unwrap().is_none());
    }
}
