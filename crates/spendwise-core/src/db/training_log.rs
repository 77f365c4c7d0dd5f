//! Training log operations
//!
//! Every prediction event inserts one row with `chosen_category_id = NULL`.
//! A correction fills that single column exactly once; rows are never deleted.

use async_trait::async_trait;
use rusqlite::{params, types::Type, OptionalExtension};
use tracing::debug;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{ConfusionPair, Direction, LabeledText, NewTrainingSample, TrainingSample};

/// Audit trail consumed by the pipeline and the adaptive learner
#[async_trait]
pub trait TrainingLog: Send + Sync {
    /// Insert a prediction event, returning its sample id
    async fn log_prediction(&self, sample: &NewTrainingSample) -> Result<i64>;

    /// Record the category the user settled on for a sample
    async fn log_correction(&self, sample_id: i64, chosen_category_id: &str) -> Result<()>;

    /// Fetch one sample by id
    async fn sample(&self, sample_id: i64) -> Result<Option<TrainingSample>>;

    /// Disagreement counts for one user
    async fn confusion_pairs(&self, user_id: &str) -> Result<Vec<ConfusionPair>>;

    /// Every corrected sample of one user, oldest first
    async fn labeled_samples(&self, user_id: &str) -> Result<Vec<LabeledText>>;
}

const SAMPLE_COLUMNS: &str = "id, user_id, text, amount, io, predicted_category_id, \
                              chosen_category_id, confidence, created_at";

fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<TrainingSample> {
    let io_str: String = row.get(4)?;
    let created_at_str: String = row.get(8)?;
    let created_at = parse_datetime(&created_at_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(TrainingSample {
        id: row.get(0)?,
        user_id: row.get(1)?,
        text: row.get(2)?,
        amount: row.get(3)?,
        io: io_str.parse().unwrap_or(Direction::Out),
        predicted_category_id: row.get(5)?,
        chosen_category_id: row.get(6)?,
        confidence: row.get(7)?,
        created_at,
    })
}

impl Database {
    /// Insert a new training sample (one per prediction event)
    pub fn insert_training_sample(&self, sample: &NewTrainingSample) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO ml_training_samples (
                user_id, text, amount, io, predicted_category_id, confidence
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                sample.user_id,
                sample.text,
                sample.amount,
                sample.io.as_str(),
                sample.predicted_category_id,
                sample.confidence,
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!(sample_id = id, user = %sample.user_id, "Logged prediction");
        Ok(id)
    }

    /// Set `chosen_category_id` on a sample that has not been corrected yet
    pub fn set_chosen_category(&self, sample_id: i64, chosen_category_id: &str) -> Result<()> {
        let conn = self.conn()?;

        let updated = conn.execute(
            r#"
            UPDATE ml_training_samples
            SET chosen_category_id = ?
            WHERE id = ? AND chosen_category_id IS NULL
            "#,
            params![chosen_category_id, sample_id],
        )?;

        if updated == 1 {
            return Ok(());
        }

        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM ml_training_samples WHERE id = ?",
                params![sample_id],
                |row| row.get(0),
            )
            .optional()?;

        match exists {
            Some(_) => Err(Error::AlreadyCorrected(sample_id)),
            None => Err(Error::NotFound(format!("training sample {}", sample_id))),
        }
    }

    /// Get a training sample by ID
    pub fn get_training_sample(&self, sample_id: i64) -> Result<Option<TrainingSample>> {
        let conn = self.conn()?;

        let sample = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ml_training_samples WHERE id = ?",
                    SAMPLE_COLUMNS
                ),
                params![sample_id],
                row_to_sample,
            )
            .optional()?;

        Ok(sample)
    }

    /// Most recent samples of a user, newest first
    pub fn list_training_samples(&self, user_id: &str, limit: i64) -> Result<Vec<TrainingSample>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ml_training_samples WHERE user_id = ? ORDER BY id DESC LIMIT ?",
            SAMPLE_COLUMNS
        ))?;

        let samples = stmt
            .query_map(params![user_id, limit], row_to_sample)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(samples)
    }

    /// Counts grouped by (predicted, chosen) over corrected samples of a user
    pub fn get_confusion_pairs(&self, user_id: &str) -> Result<Vec<ConfusionPair>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT predicted_category_id, chosen_category_id, COUNT(*) AS n
            FROM ml_training_samples
            WHERE user_id = ? AND chosen_category_id IS NOT NULL
            GROUP BY predicted_category_id, chosen_category_id
            ORDER BY n DESC, chosen_category_id
            "#,
        )?;

        let pairs = stmt
            .query_map(params![user_id], |row| {
                Ok(ConfusionPair {
                    predicted_category_id: row.get(0)?,
                    chosen_category_id: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(pairs)
    }

    /// Every corrected (text, chosen category) pair of a user, oldest first
    pub fn get_labeled_samples(&self, user_id: &str) -> Result<Vec<LabeledText>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT text, chosen_category_id
            FROM ml_training_samples
            WHERE user_id = ? AND chosen_category_id IS NOT NULL
            ORDER BY id
            "#,
        )?;

        let samples = stmt
            .query_map(params![user_id], |row| {
                Ok(LabeledText {
                    text: row.get(0)?,
                    category_id: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(samples)
    }

    /// (total, corrected) row counts for a user
    pub fn count_training_samples(&self, user_id: &str) -> Result<(i64, i64)> {
        let conn = self.conn()?;

        let counts = conn.query_row(
            r#"
            SELECT COUNT(*), COUNT(chosen_category_id)
            FROM ml_training_samples
            WHERE user_id = ?
            "#,
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(counts)
    }
}

#[async_trait]
impl TrainingLog for Database {
    async fn log_prediction(&self, sample: &NewTrainingSample) -> Result<i64> {
        self.insert_training_sample(sample)
    }

    async fn log_correction(&self, sample_id: i64, chosen_category_id: &str) -> Result<()> {
        self.set_chosen_category(sample_id, chosen_category_id)
    }

    async fn sample(&self, sample_id: i64) -> Result<Option<TrainingSample>> {
        self.get_training_sample(sample_id)
    }

    async fn confusion_pairs(&self, user_id: &str) -> Result<Vec<ConfusionPair>> {
        self.get_confusion_pairs(user_id)
    }

    async fn labeled_samples(&self, user_id: &str) -> Result<Vec<LabeledText>> {
        self.get_labeled_samples(user_id)
    }
}
