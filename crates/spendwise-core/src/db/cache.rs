//! Prediction cache rows
//!
//! The payload column holds the serialized `CachedPrediction`. It is written
//! whole on store and never patched; hits only touch `timestamp` and
//! `hit_count`, inside the same transaction that read the row.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use super::Database;
use crate::error::Result;

/// One row of `prediction_cache`
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub user_id: String,
    pub text_hash: String,
    pub normalized_text: String,
    /// Serialized prediction payload
    pub result: String,
    /// Unix milliseconds of the last store or hit
    pub timestamp: i64,
    pub hit_count: i64,
}

/// Aggregate cache counters for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: i64,
    pub total_hits: i64,
}

fn select_cache_row(
    conn: &Connection,
    user_id: &str,
    text_hash: &str,
) -> rusqlite::Result<Option<CacheRow>> {
    conn.query_row(
        r#"
        SELECT user_id, text_hash, normalized_text, result, timestamp, hit_count
        FROM prediction_cache
        WHERE user_id = ? AND text_hash = ?
        "#,
        params![user_id, text_hash],
        |row| {
            Ok(CacheRow {
                user_id: row.get(0)?,
                text_hash: row.get(1)?,
                normalized_text: row.get(2)?,
                result: row.get(3)?,
                timestamp: row.get(4)?,
                hit_count: row.get(5)?,
            })
        },
    )
    .optional()
}

impl Database {
    /// Fetch a cache row without touching it
    pub fn get_cache_row(&self, user_id: &str, text_hash: &str) -> Result<Option<CacheRow>> {
        let conn = self.conn()?;
        Ok(select_cache_row(&conn, user_id, text_hash)?)
    }

    /// Read a row and count the hit as one unit
    ///
    /// `accept` sees the row as stored and turns it into the caller's value;
    /// returning `None` leaves the row untouched. Accepted rows get
    /// `hit_count + 1` and `timestamp = now_ms` before the write lock is
    /// released, so the payload handed out is the one the hit was counted on.
    /// Returns the accepted value with the new hit count.
    pub fn hit_cache_row<T>(
        &self,
        user_id: &str,
        text_hash: &str,
        now_ms: i64,
        accept: impl FnOnce(&CacheRow) -> Option<T>,
    ) -> Result<Option<(T, i64)>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(row) = select_cache_row(&tx, user_id, text_hash)? else {
            return Ok(None);
        };
        let Some(value) = accept(&row) else {
            return Ok(None);
        };

        tx.execute(
            r#"
            UPDATE prediction_cache
            SET hit_count = hit_count + 1, timestamp = ?
            WHERE user_id = ? AND text_hash = ?
            "#,
            params![now_ms, user_id, text_hash],
        )?;
        tx.commit()?;

        Ok(Some((value, row.hit_count + 1)))
    }

    /// Insert or replace a whole cache entry
    ///
    /// A new entry starts at zero hits; replacing a stale one counts as a hit.
    pub fn upsert_cache_row(
        &self,
        user_id: &str,
        text_hash: &str,
        normalized_text: &str,
        result: &str,
        now_ms: i64,
    ) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO prediction_cache (
                user_id, text_hash, normalized_text, result, timestamp, hit_count
            ) VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(user_id, text_hash) DO UPDATE SET
                normalized_text = excluded.normalized_text,
                result = excluded.result,
                timestamp = excluded.timestamp,
                hit_count = prediction_cache.hit_count + 1
            "#,
            params![user_id, text_hash, normalized_text, result, now_ms],
        )?;

        Ok(())
    }

    pub fn cache_stats(&self, user_id: &str) -> Result<CacheStats> {
        let conn = self.conn()?;

        let stats = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(hit_count), 0)
            FROM prediction_cache
            WHERE user_id = ?
            "#,
            params![user_id],
            |row| {
                Ok(CacheStats {
                    entries: row.get(0)?,
                    total_hits: row.get(1)?,
                })
            },
        )?;

        Ok(stats)
    }

    /// Delete every cache entry of a user; returns the number removed
    pub fn clear_cache(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM prediction_cache WHERE user_id = ?",
            params![user_id],
        )?;
        Ok(removed)
    }
}
