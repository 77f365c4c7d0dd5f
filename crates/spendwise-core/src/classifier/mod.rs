//! On-device sequence classifier
//!
//! [`SequenceClassifier`] is the single owner of the network weights, the
//! tokenizer and the category map. It is constructed once and shared by
//! reference (`Arc`) with the pipeline and the adaptive learner.
//!
//! All state sits behind one `tokio::sync::RwLock`:
//! - `predict` holds a read guard for the whole forward pass
//! - `train_from_samples` and `learn_from_correction` hold the write guard
//!
//! so a fit can never interleave with a prediction or another fit. The
//! forward/backward math runs on the blocking pool with an owned guard after
//! yielding once, so queued interactive work gets the runtime first.
//!
//! `weights_version` is odd while a fit is mutating weights and even
//! otherwise. Every [`Prediction`] carries the version it read.

mod labels;
mod network;
mod rng;
mod store;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use crate::models::LabeledText;
use crate::text::{Tokenizer, Vocabulary, OOV_ID, PAD_ID};

pub use labels::CategoryIndexMap;
pub use network::{argmax, Example, FitOptions, FitReport, ModelShape, SequenceModel};
pub use rng::Rng;
pub use store::{ModelMetadata, ModelSnapshot, ModelStore, PersistedModel, MODEL_FORMAT_VERSION};

/// Cooperative cancellation flag polled between training batches
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Top label for one input
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub category_id: String,
    pub label_index: usize,
    pub confidence: f64,
    /// Weight version observed for the whole forward pass (always even)
    pub weights_version: u64,
}

/// Result of a bulk training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub samples: usize,
    pub vocab_size: usize,
    pub num_labels: usize,
    pub report: FitReport,
    pub weights_version: u64,
}

/// Read-only view for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierInfo {
    pub ready: bool,
    pub vocab_size: usize,
    pub num_labels: usize,
    pub categories: Vec<String>,
    pub weights_version: u64,
    pub fine_tunes: u64,
}

#[derive(Debug)]
struct ClassifierState {
    tokenizer: Option<Tokenizer>,
    network: Option<SequenceModel>,
    labels: CategoryIndexMap,
    /// Continues across fine-tunes so freshly created models differ from the last
    rng: Rng,
    fine_tunes: u64,
}

impl ClassifierState {
    fn is_ready(&self) -> bool {
        self.tokenizer.is_some() && self.network.is_some()
    }
}

/// Marks a weight mutation: odd version on begin, next even version on drop
struct WriteEpoch(Arc<AtomicU64>);

impl WriteEpoch {
    fn begin(version: &Arc<AtomicU64>) -> Self {
        version.fetch_add(1, Ordering::SeqCst);
        Self(version.clone())
    }
}

impl Drop for WriteEpoch {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Classifier service object
pub struct SequenceClassifier {
    config: ClassifierConfig,
    state: Arc<RwLock<ClassifierState>>,
    version: Arc<AtomicU64>,
}

impl SequenceClassifier {
    /// Create an uninitialised classifier (not ready until trained or restored)
    pub fn new(config: ClassifierConfig) -> Self {
        let rng = Rng::new(config.seed);
        Self {
            config,
            state: Arc::new(RwLock::new(ClassifierState {
                tokenizer: None,
                network: None,
                labels: CategoryIndexMap::new(),
                rng,
                fine_tunes: 0,
            })),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.is_ready()
    }

    pub fn weights_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Make categories mappable before any training has seen them
    pub async fn register_categories<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.write().await;
        for id in ids {
            state.labels.register(id.as_ref());
        }
    }

    /// Highest-probability category, or `None` if not ready
    pub async fn predict(&self, text: &str) -> Option<Prediction> {
        tokio::task::yield_now().await;

        let guard = self.state.clone().read_owned().await;
        if !guard.is_ready() {
            return None;
        }
        let weights_version = self.version.load(Ordering::SeqCst);
        let text = text.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            let tokenizer = guard.tokenizer.as_ref()?;
            let network = guard.network.as_ref()?;
            let probs = network.predict(&tokenizer.encode(&text));
            let (label_index, confidence) = argmax(&probs)?;
            Some((label_index, confidence, guard.labels.resolve(label_index)))
        })
        .await;

        match outcome {
            Ok(Some((label_index, confidence, category_id))) => Some(Prediction {
                category_id,
                label_index,
                confidence: confidence as f64,
                weights_version,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("Prediction task failed: {}", e);
                None
            }
        }
    }

    /// Rebuild vocabulary and network from scratch and fit on `samples`
    ///
    /// Labels come from the category map (new ids are registered) and the
    /// network gets `max(label) + 1` outputs (at least 2). Training runs on a
    /// scratch model; cancellation or failure leaves the previous state and
    /// readiness untouched.
    pub async fn train_from_samples(
        &self,
        samples: &[LabeledText],
        cancel: &CancelFlag,
    ) -> Result<TrainingSummary> {
        if samples.is_empty() {
            return Err(Error::Training("No samples to train on".into()));
        }

        tokio::task::yield_now().await;
        let mut guard = self.state.clone().write_owned().await;

        let vocab = Vocabulary::build(
            samples.iter().map(|s| s.text.as_str()),
            self.config.max_vocab_size,
        );
        let tokenizer = Tokenizer::new(vocab, self.config.max_sequence_length);

        let mut labels = guard.labels.clone();
        let mut examples: Vec<Example> = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            let label = labels.register(&sample.category_id);
            let sequence = tokenizer.encode(&sample.text);
            let variant = with_trailing_oov(&sequence);
            examples.push(Example { sequence, label });
            if let Some(sequence) = variant {
                examples.push(Example { sequence, label });
            }
        }
        let max_label = examples.iter().map(|e| e.label).max().unwrap_or(0);

        let shape = ModelShape {
            vocab_rows: tokenizer.vocab().embedding_rows(),
            embedding_dim: self.config.embedding_dim,
            hidden_units: self.config.hidden_units,
            num_labels: (max_label + 1).max(2),
        };
        let options = FitOptions {
            epochs: self.config.epochs,
            batch_size: self.config.batch_size.min(32),
            learning_rate: self.config.learning_rate,
        };
        let seed = self.config.seed;
        let cancel = cancel.clone();
        let version = self.version.clone();

        info!(
            samples = samples.len(),
            vocab = tokenizer.vocab().len(),
            labels = shape.num_labels,
            epochs = options.epochs,
            "Training classifier"
        );

        let outcome = tokio::task::spawn_blocking(move || {
            let mut rng = Rng::new(seed);
            let mut network = SequenceModel::new(shape, &mut rng)?;
            let report = network.fit(&examples, &options, &mut rng, || cancel.is_cancelled())?;

            let _epoch = WriteEpoch::begin(&version);
            guard.tokenizer = Some(tokenizer);
            guard.network = Some(network);
            guard.labels = labels;
            guard.rng = rng;
            guard.fine_tunes = 0;
            Ok::<_, Error>((report, guard))
        })
        .await
        .map_err(|e| Error::Training(format!("Training task failed: {}", e)))?;

        let (report, guard) = match outcome {
            Ok(done) => done,
            Err(Error::Cancelled) => {
                info!("Training cancelled, keeping previous model");
                return Err(Error::Cancelled);
            }
            Err(e) => return Err(e),
        };

        let summary = TrainingSummary {
            samples: samples.len(),
            vocab_size: guard.tokenizer.as_ref().map(|t| t.vocab().len()).unwrap_or(0),
            num_labels: shape.num_labels,
            report,
            weights_version: self.weights_version(),
        };
        drop(guard);

        info!(
            loss = summary.report.final_loss,
            version = summary.weights_version,
            "Classifier trained"
        );
        Ok(summary)
    }

    /// One gradient step (batch of one) towards `category_id` for `text`
    ///
    /// A classifier with no model yet gets one here: the vocabulary is built
    /// from this text and the network is sized for every registered category,
    /// so the first correction makes it ready. Fails with
    /// [`Error::UnmappedCategory`] for ids the category map does not know and
    /// [`Error::LabelOutOfRange`] when the category was registered after the
    /// network was sized (a full retrain picks it up).
    pub async fn learn_from_correction(&self, text: &str, category_id: &str) -> Result<u64> {
        tokio::task::yield_now().await;
        let guard = self.state.clone().write_owned().await;

        let label = guard.labels.index_of(category_id)?;
        let num_labels = (label + 1).max(guard.labels.len()).max(2);
        let config = self.config.clone();
        let text = text.to_string();
        let version = self.version.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let state = &mut *guard;

            if let Some(network) = state.network.as_ref() {
                if label >= network.num_labels() {
                    return Err(Error::LabelOutOfRange {
                        index: label,
                        labels: network.num_labels(),
                    });
                }
            }

            let _epoch = WriteEpoch::begin(&version);
            if state.tokenizer.is_none() {
                let vocab = Vocabulary::build([text.as_str()], config.max_vocab_size);
                debug!(tokens = vocab.len(), "Building vocabulary from first correction");
                state.tokenizer = Some(Tokenizer::new(vocab, config.max_sequence_length));
            }
            let tokenizer = state.tokenizer.as_ref().ok_or(Error::NotReady)?;
            let example = Example {
                sequence: tokenizer.encode(&text),
                label,
            };

            if state.network.is_none() {
                let shape = ModelShape {
                    vocab_rows: tokenizer.vocab().embedding_rows(),
                    embedding_dim: config.embedding_dim,
                    hidden_units: config.hidden_units,
                    num_labels,
                };
                debug!(labels = shape.num_labels, "Creating model for first correction");
                state.network = Some(SequenceModel::new(shape, &mut state.rng)?);
            }
            let network = state.network.as_mut().ok_or(Error::NotReady)?;
            let loss = network.train_batch(std::slice::from_ref(&example), config.learning_rate)?;
            state.fine_tunes += 1;
            Ok::<_, Error>(loss)
        })
        .await
        .map_err(|e| Error::Training(format!("Fine-tune task failed: {}", e)))?;

        let loss = result?;
        let version = self.weights_version();
        debug!(category = category_id, loss, version, "Fine-tuned on correction");
        Ok(version)
    }

    /// Copy of the current model for persistence, if ready
    pub async fn snapshot(&self) -> Option<ModelSnapshot> {
        let state = self.state.read().await;
        let tokenizer = state.tokenizer.as_ref()?;
        let network = state.network.as_ref()?;
        Some(ModelSnapshot {
            model: PersistedModel {
                network: network.clone(),
                labels: state.labels.clone(),
                max_sequence_length: tokenizer.max_len(),
            },
            vocab: tokenizer.vocab().clone(),
        })
    }

    /// Save the current model; `Ok(false)` when there is nothing to save
    pub async fn persist(&self, store: &ModelStore) -> Result<bool> {
        let Some(snapshot) = self.snapshot().await else {
            return Ok(false);
        };
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| Error::Training(format!("Save task failed: {}", e)))??;
        Ok(true)
    }

    /// Install a saved model; `Ok(false)` when none (or only a stale one) exists
    pub async fn restore(&self, store: &ModelStore) -> Result<bool> {
        let loader = store.clone();
        let snapshot = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| Error::Training(format!("Load task failed: {}", e)))??;

        let Some(snapshot) = snapshot else {
            return Ok(false);
        };

        let mut state = self.state.write().await;
        let _epoch = WriteEpoch::begin(&self.version);
        let mut labels = snapshot.model.labels;
        for id in state.labels.ids() {
            labels.register(id);
        }
        state.tokenizer = Some(Tokenizer::new(
            snapshot.vocab,
            snapshot.model.max_sequence_length,
        ));
        state.network = Some(snapshot.model.network);
        state.labels = labels;
        state.fine_tunes = 0;
        info!(dir = %store.dir().display(), "Restored saved model");
        Ok(true)
    }

    pub async fn info(&self) -> ClassifierInfo {
        let state = self.state.read().await;
        ClassifierInfo {
            ready: state.is_ready(),
            vocab_size: state.tokenizer.as_ref().map(|t| t.vocab().len()).unwrap_or(0),
            num_labels: state.network.as_ref().map(|n| n.num_labels()).unwrap_or(0),
            categories: state.labels.ids().to_vec(),
            weights_version: self.weights_version(),
            fine_tunes: state.fine_tunes,
        }
    }
}

/// Copy of `sequence` with an OOV id in its first padding slot
///
/// Notes usually end in an amount the vocabulary has never seen ("ăn trưa
/// 50k"). Training on both forms keeps the untrained OOV embedding from
/// steering the final hidden state. `None` when the sequence is full.
fn with_trailing_oov(sequence: &[u32]) -> Option<Vec<u32>> {
    let slot = sequence.iter().position(|&id| id == PAD_ID)?;
    let mut variant = sequence.to_vec();
    variant[slot] = OOV_ID;
    Some(variant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            epochs: 150,
            learning_rate: 0.03,
            ..ClassifierConfig::default()
        }
    }

    fn corpus() -> Vec<LabeledText> {
        vec![
            LabeledText::new("ăn trưa", "an_uong"),
            LabeledText::new("ăn sáng phở", "an_uong"),
            LabeledText::new("cà phê sữa", "an_uong"),
            LabeledText::new("grab đi làm", "di_chuyen"),
            LabeledText::new("đổ xăng xe máy", "di_chuyen"),
            LabeledText::new("taxi về nhà", "di_chuyen"),
        ]
    }

    #[tokio::test]
    async fn test_not_ready_predicts_none() {
        let classifier = SequenceClassifier::new(config());
        assert!(!classifier.is_ready().await);
        assert!(classifier.predict("ăn trưa").await.is_none());
    }

    #[tokio::test]
    async fn test_train_then_predict() {
        let classifier = SequenceClassifier::new(config());
        let summary = classifier
            .train_from_samples(&corpus(), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.samples, 6);
        assert_eq!(summary.num_labels, 2);
        assert_eq!(summary.weights_version % 2, 0);
        assert!(classifier.is_ready().await);

        let prediction = classifier.predict("ăn trưa").await.unwrap();
        assert_eq!(prediction.category_id, "an_uong");
        assert_eq!(prediction.weights_version % 2, 0);

        let prediction = classifier.predict("grab đi làm").await.unwrap();
        assert_eq!(prediction.category_id, "di_chuyen");
    }

    #[tokio::test]
    async fn test_cancelled_training_stays_not_ready() {
        let classifier = SequenceClassifier::new(config());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = classifier.train_from_samples(&corpus(), &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!classifier.is_ready().await);
        assert_eq!(classifier.weights_version() % 2, 0);
    }

    #[tokio::test]
    async fn test_correction_requires_mapping() {
        let classifier = SequenceClassifier::new(config());
        classifier
            .train_from_samples(&corpus(), &CancelFlag::new())
            .await
            .unwrap();

        let result = classifier.learn_from_correction("ăn trưa", "khong_ton_tai").await;
        assert!(matches!(result, Err(Error::UnmappedCategory(_))));
    }

    #[tokio::test]
    async fn test_first_correction_creates_model() {
        let classifier = SequenceClassifier::new(config());
        classifier
            .register_categories(["an_uong", "di_chuyen", "mua_sam"])
            .await;
        assert!(!classifier.is_ready().await);

        let version = classifier
            .learn_from_correction("ăn trưa", "an_uong")
            .await
            .unwrap();

        assert_eq!(version, 2);
        assert!(classifier.is_ready().await);
        let info = classifier.info().await;
        assert_eq!(info.vocab_size, 2);
        assert_eq!(info.num_labels, 3);
        assert_eq!(info.fine_tunes, 1);
        assert!(classifier.predict("ăn trưa").await.is_some());

        // Later corrections reuse the model instead of resizing it
        classifier
            .learn_from_correction("grab đi làm", "di_chuyen")
            .await
            .unwrap();
        let info = classifier.info().await;
        assert_eq!(info.vocab_size, 2);
        assert_eq!(info.fine_tunes, 2);
    }

    #[tokio::test]
    async fn test_first_correction_with_single_category() {
        let classifier = SequenceClassifier::new(config());
        classifier.register_categories(["an_uong"]).await;

        classifier
            .learn_from_correction("ăn trưa", "an_uong")
            .await
            .unwrap();

        assert_eq!(classifier.info().await.num_labels, 2);
        let prediction = classifier.predict("ăn trưa").await.unwrap();
        assert!(prediction.label_index < 2);
    }

    #[test]
    fn test_trailing_oov_fills_first_padding_slot() {
        assert_eq!(with_trailing_oov(&[5, 7, 0, 0]), Some(vec![5, 7, OOV_ID, 0]));
        assert_eq!(with_trailing_oov(&[0, 0]), Some(vec![OOV_ID, 0]));
        assert_eq!(with_trailing_oov(&[5, 7, 9]), None);
    }

    #[tokio::test]
    async fn test_training_reports_samples_not_examples() {
        let classifier = SequenceClassifier::new(config());
        let summary = classifier
            .train_from_samples(&corpus(), &CancelFlag::new())
            .await
            .unwrap();

        // Each sample is fitted with and without a trailing unknown token
        assert_eq!(summary.samples, 6);
        assert_eq!(summary.report.batches, 150 * 2);
        let prediction = classifier.predict("ăn trưa 45k").await.unwrap();
        assert_eq!(prediction.category_id, "an_uong");
    }

    #[tokio::test]
    async fn test_correction_bumps_version() {
        let classifier = SequenceClassifier::new(config());
        classifier
            .train_from_samples(&corpus(), &CancelFlag::new())
            .await
            .unwrap();
        let before = classifier.weights_version();

        let after = classifier
            .learn_from_correction("ăn trưa", "di_chuyen")
            .await
            .unwrap();
        assert_eq!(after, before + 2);
        assert_eq!(classifier.info().await.fine_tunes, 1);
    }

    #[tokio::test]
    async fn test_category_registered_after_training_is_out_of_range() {
        let classifier = SequenceClassifier::new(config());
        classifier
            .train_from_samples(&corpus(), &CancelFlag::new())
            .await
            .unwrap();
        classifier.register_categories(["giai_tri"]).await;

        let result = classifier.learn_from_correction("xem phim", "giai_tri").await;
        assert!(matches!(
            result,
            Err(Error::LabelOutOfRange { index: 2, labels: 2 })
        ));
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());

        let trained = SequenceClassifier::new(config());
        assert!(!trained.persist(&store).await.unwrap());
        trained
            .train_from_samples(&corpus(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(trained.persist(&store).await.unwrap());

        let restored = SequenceClassifier::new(config());
        assert!(restored.restore(&store).await.unwrap());
        assert!(restored.is_ready().await);

        let a = trained.predict("taxi về nhà").await.unwrap();
        let b = restored.predict("taxi về nhà").await.unwrap();
        assert_eq!(a.category_id, b.category_id);
        assert!((a.confidence - b.confidence).abs() < 1e-6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_predict_never_sees_partial_weights() {
        let classifier = Arc::new(SequenceClassifier::new(config()));
        classifier
            .train_from_samples(&corpus(), &CancelFlag::new())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let c = classifier.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let category = if i % 2 == 0 { "an_uong" } else { "di_chuyen" };
                    c.learn_from_correction("ăn trưa", category).await.unwrap();
                }
                Vec::new()
            }));
        }
        for _ in 0..4 {
            let c = classifier.clone();
            handles.push(tokio::spawn(async move {
                let mut versions = Vec::new();
                for _ in 0..25 {
                    let before = c.weights_version();
                    let prediction = c.predict("cà phê sữa").await.unwrap();
                    versions.push((before, prediction.weights_version));
                }
                versions
            }));
        }

        for handle in handles {
            for (before, seen) in handle.await.unwrap() {
                assert_eq!(seen % 2, 0, "prediction read odd version {}", seen);
                assert!(seen >= before - before % 2);
            }
        }
        assert_eq!(classifier.weights_version() % 2, 0);
    }
}
