//! Rolling-window diagnostics
//!
//! Keeps the latest N latency events (one per classification) and the latest
//! M accuracy events (one per accepted correction). Oldest events are dropped
//! first. Nothing in the resolution path reads these windows.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::models::PredictionSource;
use crate::persist::{read_json, write_json_atomic};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyEvent {
    pub at: DateTime<Utc>,
    pub source: PredictionSource,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyEvent {
    pub at: DateTime<Utc>,
    pub predicted_category_id: Option<String>,
    pub chosen_category_id: String,
    pub correct: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Windows {
    #[serde(default)]
    latency: VecDeque<LatencyEvent>,
    #[serde(default)]
    accuracy: VecDeque<AccuracyEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
    pub by_source: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccuracySnapshot {
    pub total: usize,
    pub correct: usize,
    /// `None` until at least one correction was recorded
    pub accuracy: Option<f64>,
}

pub struct Monitor {
    config: MonitoringConfig,
    path: Option<PathBuf>,
    windows: Mutex<Windows>,
}

fn truncate<T>(window: &mut VecDeque<T>, limit: usize) {
    while window.len() > limit {
        window.pop_front();
    }
}

/// Nearest-rank percentile over sorted values
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl Monitor {
    /// In-memory monitor (nothing persisted)
    pub fn new(config: MonitoringConfig) -> Self {
        Self {
            config,
            path: None,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Monitor backed by a JSON file, reloading any previous windows
    ///
    /// An unreadable file is logged and replaced on the next write.
    pub fn open(config: MonitoringConfig, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut windows = match read_json::<Windows>(&path) {
            Ok(Some(w)) => w,
            Ok(None) => Windows::default(),
            Err(e) => {
                warn!(path = %path.display(), "Discarding unreadable monitor file: {}", e);
                Windows::default()
            }
        };
        truncate(&mut windows.latency, config.latency_window);
        truncate(&mut windows.accuracy, config.accuracy_window);

        Self {
            config,
            path: Some(path),
            windows: Mutex::new(windows),
        }
    }

    pub fn record_latency(&self, source: PredictionSource, elapsed: Duration) {
        let snapshot = {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            windows.latency.push_back(LatencyEvent {
                at: Utc::now(),
                source,
                latency_ms: elapsed.as_secs_f64() * 1000.0,
            });
            truncate(&mut windows.latency, self.config.latency_window);
            windows.clone()
        };
        self.write_best_effort(&snapshot);
    }

    pub fn record_accuracy(&self, predicted_category_id: Option<&str>, chosen_category_id: &str) {
        let snapshot = {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            windows.accuracy.push_back(AccuracyEvent {
                at: Utc::now(),
                predicted_category_id: predicted_category_id.map(String::from),
                chosen_category_id: chosen_category_id.to_string(),
                correct: predicted_category_id == Some(chosen_category_id),
            });
            truncate(&mut windows.accuracy, self.config.accuracy_window);
            windows.clone()
        };
        self.write_best_effort(&snapshot);
    }

    pub fn latency_events(&self) -> Vec<LatencyEvent> {
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.latency.iter().cloned().collect()
    }

    pub fn accuracy_events(&self) -> Vec<AccuracyEvent> {
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.accuracy.iter().cloned().collect()
    }

    pub fn latency_snapshot(&self) -> LatencySnapshot {
        let events = self.latency_events();
        if events.is_empty() {
            return LatencySnapshot::default();
        }

        let mut values: Vec<f64> = events.iter().map(|e| e.latency_ms).collect();
        values.sort_by(|a, b| a.total_cmp(b));

        let mut by_source = BTreeMap::new();
        for event in &events {
            *by_source.entry(event.source.to_string()).or_insert(0) += 1;
        }

        LatencySnapshot {
            count: values.len(),
            mean_ms: values.iter().sum::<f64>() / values.len() as f64,
            p50_ms: percentile(&values, 0.50),
            p95_ms: percentile(&values, 0.95),
            max_ms: values.last().copied().unwrap_or(0.0),
            by_source,
        }
    }

    pub fn accuracy_snapshot(&self) -> AccuracySnapshot {
        let events = self.accuracy_events();
        let total = events.len();
        let correct = events.iter().filter(|e| e.correct).count();
        AccuracySnapshot {
            total,
            correct,
            accuracy: (total > 0).then(|| correct as f64 / total as f64),
        }
    }

    /// Write the current windows to the backing file (no-op when in-memory)
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        write_json_atomic(path, &windows)
    }

    fn write_best_effort(&self, windows: &Windows) {
        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, windows) {
                warn!(path = %path.display(), "Failed to write monitor file: {}", e);
            }
        }
    }
}
