//! Classification pipeline
//!
//! Resolves one input text through the tiers in order:
//!
//! 1. **Cache** - fresh entry for the same normalized text and user
//! 2. **Model** - on-device classifier, accepted above `min_confidence`
//! 3. **Remote** - injected provider list, only when the model gave no answer
//! 4. **Extractor** - always runs for amount and direction; on its own it is
//!    the category-less fallback
//!
//! Every resolution (cache hits included) is appended to the training log and
//! returned with its sample id. Non-placeholder results from tiers 2-4 are
//! written to the cache. No tier failure reaches the caller: storage and
//! provider errors are logged and the next tier runs.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::ai::{RemoteClassification, RemoteFallback};
use crate::cache::PredictionCache;
use crate::classifier::{CancelFlag, ModelStore, SequenceClassifier, TrainingSummary};
use crate::config::{LearnerConfig, PipelineConfig, SpendwiseConfig};
use crate::db::{Database, TrainingLog};
use crate::directory::{CategoryDirectory, StaticCategoryDirectory};
use crate::error::{Error, Result};
use crate::extract::{AmountExtractor, Extraction};
use crate::learner::AdaptiveLearner;
use crate::models::{
    CachedPrediction, ConfusionPair, Correction, Direction, LabeledText, NewTrainingSample,
    PredictionSource,
};
use crate::monitor::Monitor;
use crate::text::normalize;

/// Overall confidence given to an extractor-only answer that found an amount
const EXTRACTOR_CONFIDENCE: f64 = 0.3;
/// Overall confidence for a remote answer that carried no score of its own
const REMOTE_DEFAULT_CONFIDENCE: f64 = 0.5;

/// How [`ClassificationPipeline::warm_up`] made the classifier ready
#[derive(Debug, Clone, PartialEq)]
pub enum WarmUp {
    /// A saved model matching the vocabulary was installed
    Restored,
    /// Trained from the training log and seed corpus
    Trained(TrainingSummary),
    /// Nothing to restore or train from; the classifier stays not ready
    Skipped,
}

/// Category chosen by the model or remote tier
struct CategoryAnswer {
    category_id: String,
    confidence: Option<f64>,
}

pub struct ClassificationPipeline {
    config: PipelineConfig,
    learner_config: LearnerConfig,
    classifier: Arc<SequenceClassifier>,
    remote: Arc<RemoteFallback>,
    extractor: AmountExtractor,
    cache: PredictionCache,
    log: Arc<dyn TrainingLog>,
    directory: Arc<dyn CategoryDirectory>,
    learner: AdaptiveLearner,
    monitor: Arc<Monitor>,
    store: Option<ModelStore>,
    user_id: RwLock<String>,
}

impl ClassificationPipeline {
    /// Wire a pipeline for `user_id` from configuration
    ///
    /// The database backs both the cache and the training log. Providers are
    /// injected through `remote` (use [`RemoteFallback::disabled`] for none).
    pub fn new(config: &SpendwiseConfig, db: Database, remote: RemoteFallback, user_id: &str) -> Self {
        let classifier = Arc::new(SequenceClassifier::new(config.classifier.clone()));
        let learner = AdaptiveLearner::new(classifier.clone(), config.learner.clone());

        Self {
            config: config.pipeline.clone(),
            learner_config: config.learner.clone(),
            classifier,
            remote: Arc::new(remote),
            extractor: AmountExtractor::new(),
            cache: PredictionCache::new(db.clone(), config.pipeline.cache_ttl),
            log: Arc::new(db),
            directory: Arc::new(StaticCategoryDirectory::new(config.categories.clone())),
            learner,
            monitor: Arc::new(Monitor::new(config.monitoring.clone())),
            store: None,
            user_id: RwLock::new(user_id.to_string()),
        }
    }

    /// Share an existing classifier service
    pub fn with_classifier(mut self, classifier: Arc<SequenceClassifier>) -> Self {
        self.classifier = classifier;
        self.rebuild_learner();
        self
    }

    /// Persist models to `store`: warm-up restores from it, retraining and
    /// learner flushes save to it
    pub fn with_model_store(mut self, store: ModelStore) -> Self {
        self.store = Some(store);
        self.rebuild_learner();
        self
    }

    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = Arc::new(monitor);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn CategoryDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_training_log(mut self, log: Arc<dyn TrainingLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_extractor(mut self, extractor: AmountExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    fn rebuild_learner(&mut self) {
        self.learner = match &self.store {
            Some(store) => AdaptiveLearner::with_store(
                self.classifier.clone(),
                self.learner_config.clone(),
                store.clone(),
            ),
            None => AdaptiveLearner::new(self.classifier.clone(), self.learner_config.clone()),
        };
    }

    pub fn classifier(&self) -> &Arc<SequenceClassifier> {
        &self.classifier
    }

    pub fn learner(&self) -> &AdaptiveLearner {
        &self.learner
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    pub fn remote(&self) -> &RemoteFallback {
        &self.remote
    }

    pub fn user_id(&self) -> String {
        self.user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make `user_id` the active account for cache and log access
    pub fn switch_user(&self, user_id: &str) {
        let mut current = self.user_id.write().unwrap_or_else(PoisonError::into_inner);
        if *current != user_id {
            info!(from = %current, to = user_id, "Switching active user");
            *current = user_id.to_string();
        }
    }

    /// Resolve `text` into a prediction; never fails
    pub async fn classify(&self, text: &str) -> CachedPrediction {
        let started = Instant::now();
        let user_id = self.user_id();

        if normalize(text).is_empty() {
            return CachedPrediction::placeholder(text);
        }

        match self.cache.lookup(&user_id, text) {
            Ok(Some(hit)) => {
                let mut prediction = hit.prediction;
                prediction.sample_id = self.log_event(&user_id, text, &prediction).await;
                self.monitor
                    .record_latency(PredictionSource::Cache, started.elapsed());
                debug!(hits = hit.hit_count, "Served from cache");
                return prediction;
            }
            Ok(None) => {}
            Err(e) => warn!("Cache lookup failed, resolving without it: {}", e),
        }

        let extraction = self.extractor.extract(text);
        let mut prediction = self.resolve(text, extraction).await;

        if prediction.is_placeholder() {
            debug!("No tier recognised the input");
            prediction = CachedPrediction::placeholder(text);
        } else if let Err(e) = self.cache.store(&user_id, text, &prediction) {
            warn!("Failed to cache prediction: {}", e);
        }

        prediction.sample_id = self.log_event(&user_id, text, &prediction).await;
        self.monitor.record_latency(prediction.source, started.elapsed());
        prediction
    }

    /// Tiers 2-4 for a cache miss
    async fn resolve(&self, text: &str, extraction: Extraction) -> CachedPrediction {
        let model = match self.classifier.predict(text).await {
            Some(p) if p.confidence > self.config.min_confidence => {
                debug!(category = %p.category_id, confidence = p.confidence, "Model answer accepted");
                Some(CategoryAnswer {
                    category_id: p.category_id,
                    confidence: Some(p.confidence),
                })
            }
            Some(p) => {
                debug!(
                    confidence = p.confidence,
                    min = self.config.min_confidence,
                    "Model answer not above threshold"
                );
                None
            }
            None => {
                debug!("Classifier not ready");
                None
            }
        };

        if let Some(answer) = model {
            return self.assemble(text, PredictionSource::Model, Some(answer), extraction, None);
        }

        let categories = self.directory.categories();
        if let Some(remote) = self.remote.classify(text, &categories).await {
            let answer = remote.category_id.clone().map(|category_id| CategoryAnswer {
                category_id,
                confidence: remote.confidence,
            });
            return self.assemble(text, PredictionSource::Llm, answer, extraction, Some(remote));
        }

        self.assemble(text, PredictionSource::Extractor, None, extraction, None)
    }

    fn assemble(
        &self,
        text: &str,
        source: PredictionSource,
        answer: Option<CategoryAnswer>,
        extraction: Extraction,
        remote: Option<RemoteClassification>,
    ) -> CachedPrediction {
        let remote = remote.as_ref();
        let amount = remote.and_then(|r| r.amount).or(extraction.amount);
        let io = remote.and_then(|r| r.io).unwrap_or(extraction.direction);
        let category_id = answer.as_ref().map(|a| a.category_id.clone());
        let category_name = category_id
            .as_deref()
            .and_then(|id| self.directory.name_of(id));
        let confidence = answer.as_ref().and_then(|a| a.confidence);

        let overall_confidence = match source {
            PredictionSource::Model => confidence.unwrap_or(0.0),
            PredictionSource::Llm => confidence.unwrap_or(REMOTE_DEFAULT_CONFIDENCE),
            _ if amount.is_some() => EXTRACTOR_CONFIDENCE,
            _ => 0.0,
        };

        let transactions = remote.map(|r| r.transactions.clone()).unwrap_or_default();
        let multiple = remote.map(|r| r.multiple).unwrap_or(false);
        let note = remote
            .and_then(|r| r.note.clone())
            .or_else(|| Some(text.trim().to_string()).filter(|n| !n.is_empty()));

        let message = if multiple && !transactions.is_empty() {
            let total: f64 = transactions.iter().filter_map(|t| t.amount).sum();
            format!("{} transactions · {}", transactions.len(), format_vnd(total))
        } else {
            suggestion_message(category_name.as_deref(), amount, io)
        };

        CachedPrediction {
            amount,
            category_id,
            category_name,
            io,
            confidence,
            note,
            date: remote.and_then(|r| r.date),
            multiple,
            transactions,
            message,
            overall_confidence,
            source,
            sample_id: None,
        }
    }

    /// Append the prediction event to the log; `None` if logging failed
    async fn log_event(&self, user_id: &str, text: &str, prediction: &CachedPrediction) -> Option<i64> {
        let sample = NewTrainingSample {
            user_id: user_id.to_string(),
            text: text.to_string(),
            amount: prediction.amount,
            io: prediction.io,
            predicted_category_id: prediction.category_id.clone(),
            confidence: prediction.confidence,
        };
        match self.log.log_prediction(&sample).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to log prediction: {}", e);
                None
            }
        }
    }

    /// Record the user's category for a logged prediction and queue a fine-tune
    pub async fn accept_correction(&self, sample_id: i64, category_id: &str) -> Result<()> {
        let user_id = self.user_id();
        let sample = self
            .log
            .sample(sample_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| Error::NotFound(format!("training sample {}", sample_id)))?;

        if !self.directory.categories().is_empty() && !self.directory.contains(category_id) {
            return Err(Error::NotFound(format!("category {}", category_id)));
        }

        self.log.log_correction(sample_id, category_id).await?;
        self.monitor
            .record_accuracy(sample.predicted_category_id.as_deref(), category_id);
        self.learner.enqueue(Correction {
            text: sample.text,
            category_id: category_id.to_string(),
            sample_id: Some(sample_id),
        });

        info!(sample_id, category = category_id, "Correction accepted");
        Ok(())
    }

    pub async fn confusion_pairs(&self) -> Result<Vec<ConfusionPair>> {
        self.log.confusion_pairs(&self.user_id()).await
    }

    /// Make the classifier ready: restore a saved model, else train
    ///
    /// Training uses the user's corrected samples plus `seed`. A cancelled
    /// warm-up returns [`Error::Cancelled`] and leaves the classifier as it was.
    pub async fn warm_up(&self, seed: &[LabeledText], cancel: &CancelFlag) -> Result<WarmUp> {
        self.register_directory_categories().await;

        if let Some(store) = &self.store {
            match self.classifier.restore(store).await {
                Ok(true) => return Ok(WarmUp::Restored),
                Ok(false) => debug!("No usable saved model"),
                Err(e) => warn!("Failed to restore saved model: {}", e),
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let samples = self.training_set(seed).await;
        if samples.is_empty() {
            info!("Nothing to train on; classifier stays not ready");
            return Ok(WarmUp::Skipped);
        }

        let summary = self.classifier.train_from_samples(&samples, cancel).await?;
        self.persist_model().await;
        Ok(WarmUp::Trained(summary))
    }

    /// Full retrain from the audit trail plus `seed`, then save
    pub async fn retrain_from_log(
        &self,
        seed: &[LabeledText],
        cancel: &CancelFlag,
    ) -> Result<TrainingSummary> {
        self.register_directory_categories().await;
        let samples = self.training_set(seed).await;
        if samples.is_empty() {
            return Err(Error::Training("No corrected samples or seed corpus".into()));
        }
        let summary = self.classifier.train_from_samples(&samples, cancel).await?;
        self.persist_model().await;
        Ok(summary)
    }

    async fn register_directory_categories(&self) {
        let ids: Vec<String> = self
            .directory
            .categories()
            .into_iter()
            .map(|c| c.id)
            .collect();
        self.classifier.register_categories(ids).await;
    }

    async fn training_set(&self, seed: &[LabeledText]) -> Vec<LabeledText> {
        let mut samples = seed.to_vec();
        match self.log.labeled_samples(&self.user_id()).await {
            Ok(logged) => {
                debug!(logged = logged.len(), seed = seed.len(), "Assembled training set");
                samples.extend(logged);
            }
            Err(e) => warn!("Failed to read corrected samples, using seed only: {}", e),
        }
        samples
    }

    /// Save the current model if a store is configured; failures are logged
    pub async fn persist_model(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match self.classifier.persist(store).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Failed to save model: {}", e);
                false
            }
        }
    }
}

/// "50000" -> "50.000đ"
pub fn format_vnd(amount: f64) -> String {
    let rounded = amount.round().abs() as u64;
    let digits = rounded.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    format!("{}đ", grouped)
}

fn suggestion_message(category_name: Option<&str>, amount: Option<f64>, io: Direction) -> String {
    let sign = match io {
        Direction::In => "+",
        Direction::Out => "-",
    };
    match (category_name, amount) {
        (Some(name), Some(amount)) => format!("{} · {}{}", name, sign, format_vnd(amount)),
        (Some(name), None) => name.to_string(),
        (None, Some(amount)) => format!("Uncategorized · {}{}", sign, format_vnd(amount)),
        (None, None) => "Could not recognise an amount or category".to_string(),
    }
}
