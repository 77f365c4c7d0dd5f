//! Content-addressed prediction cache
//!
//! Entries are keyed by `(user_id, sha256(normalize(text)))`. A hit bumps the
//! counter and refreshes recency. An entry older than the TTL is not removed;
//! the next lookup simply reports a miss and the recomputed prediction
//! replaces it.

use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::{CacheStats, Database};
use crate::error::Result;
use crate::models::{CachedPrediction, PredictionSource};
use crate::text::normalize;

/// A fresh cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// Stored prediction with `source` rewritten to `cache`
    pub prediction: CachedPrediction,
    /// Hit count after this lookup
    pub hit_count: i64,
}

/// SHA-256 of the normalized text, hex encoded
pub fn text_hash(normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct PredictionCache {
    db: Database,
    ttl: Duration,
}

impl PredictionCache {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Fresh entry for `text`, or `None` on a miss
    ///
    /// Stale and undecodable entries count as misses and are not touched.
    pub fn lookup(&self, user_id: &str, text: &str) -> Result<Option<CacheHit>> {
        let normalized = normalize(text);
        let hash = text_hash(&normalized);

        let now = Self::now_ms();
        let ttl_ms = self.ttl.as_millis();

        let hit = self.db.hit_cache_row(user_id, &hash, now, |row| {
            let age_ms = now.saturating_sub(row.timestamp).max(0) as u128;
            if age_ms > ttl_ms {
                debug!(hash = %hash, age_ms, "Cache entry is stale");
                return None;
            }
            match serde_json::from_str::<CachedPrediction>(&row.result) {
                Ok(prediction) => Some(prediction),
                Err(e) => {
                    warn!(hash = %hash, "Undecodable cache entry, treating as miss: {}", e);
                    None
                }
            }
        })?;

        let Some((mut prediction, hit_count)) = hit else {
            return Ok(None);
        };
        prediction.source = PredictionSource::Cache;
        debug!(hash = %hash, hit_count, "Cache hit");

        Ok(Some(CacheHit {
            prediction,
            hit_count,
        }))
    }

    /// Store (or replace) the prediction for `text`
    pub fn store(&self, user_id: &str, text: &str, prediction: &CachedPrediction) -> Result<()> {
        let normalized = normalize(text);
        let hash = text_hash(&normalized);
        let payload = serde_json::to_string(prediction)?;

        self.db
            .upsert_cache_row(user_id, &hash, &normalized, &payload, Self::now_ms())?;
        debug!(hash = %hash, source = %prediction.source, "Cached prediction");
        Ok(())
    }

    pub fn stats(&self, user_id: &str) -> Result<CacheStats> {
        self.db.cache_stats(user_id)
    }

    /// Remove every entry of `user_id` (sign-out)
    pub fn clear(&self, user_id: &str) -> Result<usize> {
        self.db.clear_cache(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn prediction() -> CachedPrediction {
        CachedPrediction {
            amount: Some(50000.0),
            category_id: Some("an_uong".into()),
            category_name: Some("Ăn uống".into()),
            io: Direction::Out,
            confidence: Some(0.9),
            note: Some("ăn trưa 50k".into()),
            date: None,
            multiple: false,
            transactions: Vec::new(),
            message: "Ăn uống: 50,000".into(),
            overall_confidence: 0.9,
            source: PredictionSource::Model,
            sample_id: Some(7),
        }
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = text_hash("ăn trưa");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, text_hash("ăn trưa"));
        assert_ne!(hash, text_hash("ăn tối"));
    }

    #[test]
    fn test_hits_count_and_normalize() {
        let cache = PredictionCache::new(Database::in_memory().unwrap(), Duration::from_secs(60));
        assert!(cache.lookup("u1", "ăn trưa 50k").unwrap().is_none());

        cache.store("u1", "ăn trưa 50k", &prediction()).unwrap();

        let first = cache.lookup("u1", "Ăn trưa,  50k!").unwrap().unwrap();
        assert_eq!(first.hit_count, 1);
        assert_eq!(first.prediction.source, PredictionSource::Cache);
        assert_eq!(first.prediction.amount, Some(50000.0));
        assert_eq!(first.prediction.sample_id, None);

        let second = cache.lookup("u1", "ăn trưa 50k").unwrap().unwrap();
        assert_eq!(second.hit_count, 2);
    }

    #[test]
    fn test_users_are_isolated() {
        let cache = PredictionCache::new(Database::in_memory().unwrap(), Duration::from_secs(60));
        cache.store("u1", "grab", &prediction()).unwrap();

        assert!(cache.lookup("u2", "grab").unwrap().is_none());
        assert!(cache.lookup("u1", "grab").unwrap().is_some());
    }

    #[test]
    fn test_stale_entry_is_a_miss() {
        let db = Database::in_memory().unwrap();
        let cache = PredictionCache::new(db.clone(), Duration::from_secs(60));

        let payload = serde_json::to_string(&prediction()).unwrap();
        let old = Utc::now().timestamp_millis() - 61_000;
        db.upsert_cache_row("u1", &text_hash("grab"), "grab", &payload, old)
            .unwrap();

        assert!(cache.lookup("u1", "grab").unwrap().is_none());
        // Soft invalidation: the row is still there
        assert_eq!(cache.stats("u1").unwrap().entries, 1);

        cache.store("u1", "grab", &prediction()).unwrap();
        assert!(cache.lookup("u1", "grab").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_payload_is_a_miss() {
        let db = Database::in_memory().unwrap();
        let cache = PredictionCache::new(db.clone(), Duration::from_secs(60));
        db.upsert_cache_row(
            "u1",
            &text_hash("grab"),
            "grab",
            "not json",
            Utc::now().timestamp_millis(),
        )
        .unwrap();

        assert!(cache.lookup("u1", "grab").unwrap().is_none());
        assert_eq!(cache.stats("u1").unwrap().total_hits, 0);
    }

    #[test]
    fn test_concurrent_hits_get_distinct_counts() {
        let cache = PredictionCache::new(Database::in_memory().unwrap(), Duration::from_secs(60));
        cache.store("u1", "ăn trưa 50k", &prediction()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .map(|_| cache.lookup("u1", "ăn trưa 50k").unwrap().unwrap().hit_count)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        counts.sort_unstable();

        assert_eq!(counts, (1..=40).collect::<Vec<i64>>());
        assert_eq!(cache.stats("u1").unwrap().total_hits, 40);
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = PredictionCache::new(Database::in_memory().unwrap(), Duration::from_secs(60));
        cache.store("u1", "a", &prediction()).unwrap();
        cache.store("u1", "b", &prediction()).unwrap();
        cache.lookup("u1", "a").unwrap();

        let stats = cache.stats("u1").unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_hits, 1);

        assert_eq!(cache.clear("u1").unwrap(), 2);
        assert!(cache.lookup("u1", "a").unwrap().is_none());
    }
}
