//! Correction-driven fine-tuning
//!
//! Corrections are queued in memory. The first enqueue arms a debounce timer;
//! further enqueues inside the window coalesce into that same pending flush.
//! A flush takes up to `batch_size` corrections from the front of the queue
//! and fine-tunes on each in order. It never re-arms itself: leftovers wait
//! for the next enqueue. A correction whose fine-tune fails is logged and
//! dropped. The queue is not persisted; the training log keeps the record.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::classifier::{ModelStore, SequenceClassifier};
use crate::config::LearnerConfig;
use crate::models::Correction;
use crate::scheduler::Debouncer;

const FLUSH_KEY: &str = "learner-flush";

/// Running counters, published on every change
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearnerStats {
    pub enqueued: u64,
    pub applied: u64,
    pub failed: u64,
    pub flushes: u64,
    pub pending: usize,
    pub last_flush_at: Option<DateTime<Utc>>,
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub processed: usize,
    pub applied: usize,
    pub failed: usize,
    pub remaining: usize,
}

struct Inner {
    classifier: Arc<SequenceClassifier>,
    config: LearnerConfig,
    store: Option<ModelStore>,
    queue: Mutex<VecDeque<Correction>>,
    debouncer: Debouncer,
    stats: watch::Sender<LearnerStats>,
    /// Serializes flushes so batches are applied in queue order
    flushing: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct AdaptiveLearner {
    inner: Arc<Inner>,
}

impl AdaptiveLearner {
    pub fn new(classifier: Arc<SequenceClassifier>, config: LearnerConfig) -> Self {
        Self::build(classifier, config, None)
    }

    /// Save the model to `store` after every flush that changed it
    pub fn with_store(
        classifier: Arc<SequenceClassifier>,
        config: LearnerConfig,
        store: ModelStore,
    ) -> Self {
        Self::build(classifier, config, Some(store))
    }

    fn build(
        classifier: Arc<SequenceClassifier>,
        config: LearnerConfig,
        store: Option<ModelStore>,
    ) -> Self {
        let (stats, _) = watch::channel(LearnerStats::default());
        Self {
            inner: Arc::new(Inner {
                classifier,
                config,
                store,
                queue: Mutex::new(VecDeque::new()),
                debouncer: Debouncer::new(),
                stats,
                flushing: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Queue a correction and arm the flush timer if it is idle
    ///
    /// Returns `true` when this call armed the timer.
    pub fn enqueue(&self, correction: Correction) -> bool {
        let pending = {
            let mut queue = self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.push_back(correction);
            queue.len()
        };
        self.inner.stats.send_modify(|s| {
            s.enqueued += 1;
            s.pending = pending;
        });

        let inner = self.inner.clone();
        let armed = self
            .inner
            .debouncer
            .schedule_if_idle(FLUSH_KEY, self.inner.config.debounce, move || async move {
                inner.flush().await;
            });
        debug!(pending, armed, "Correction queued");
        armed
    }

    /// Process the next batch now, without waiting for the timer
    pub async fn flush(&self) -> FlushReport {
        self.inner.flush().await
    }

    /// Cancel the timer and process everything queued (shutdown path)
    pub async fn drain(&self) -> FlushReport {
        self.inner.debouncer.cancel(FLUSH_KEY);
        let mut total = FlushReport::default();
        loop {
            let report = self.inner.flush().await;
            total.processed += report.processed;
            total.applied += report.applied;
            total.failed += report.failed;
            total.remaining = report.remaining;
            if report.processed == 0 || report.remaining == 0 {
                return total;
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.debouncer.is_pending(FLUSH_KEY)
    }

    pub fn stats(&self) -> LearnerStats {
        self.inner.stats.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LearnerStats> {
        self.inner.stats.subscribe()
    }
}

impl Inner {
    fn take_batch(&self) -> (Vec<Correction>, usize) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let take = self.config.batch_size.min(queue.len());
        let batch: Vec<Correction> = queue.drain(..take).collect();
        (batch, queue.len())
    }

    async fn flush(&self) -> FlushReport {
        let _flushing = self.flushing.lock().await;

        let (batch, remaining) = self.take_batch();
        if batch.is_empty() {
            return FlushReport::default();
        }

        let mut report = FlushReport {
            processed: batch.len(),
            remaining,
            ..FlushReport::default()
        };

        for correction in &batch {
            match self
                .classifier
                .learn_from_correction(&correction.text, &correction.category_id)
                .await
            {
                Ok(version) => {
                    report.applied += 1;
                    debug!(
                        sample_id = ?correction.sample_id,
                        category = %correction.category_id,
                        version,
                        "Applied correction"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        sample_id = ?correction.sample_id,
                        category = %correction.category_id,
                        "Dropping correction: {}",
                        e
                    );
                }
            }
        }

        if report.applied > 0 {
            if let Some(store) = &self.store {
                if let Err(e) = self.classifier.persist(store).await {
                    warn!("Failed to save fine-tuned model: {}", e);
                }
            }
        }

        let pending = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        self.stats.send_modify(|s| {
            s.applied += report.applied as u64;
            s.failed += report.failed as u64;
            s.flushes += 1;
            s.pending = pending;
            s.last_flush_at = Some(Utc::now());
        });

        info!(
            applied = report.applied,
            failed = report.failed,
            remaining = pending,
            "Learner flush complete"
        );
        report
    }
}
