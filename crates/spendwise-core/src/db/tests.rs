//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(user: &str, text: &str, predicted: Option<&str>) -> NewTrainingSample {
        NewTrainingSample {
            user_id: user.to_string(),
            text: text.to_string(),
            amount: Some(50000.0),
            io: Direction::Out,
            predicted_category_id: predicted.map(String::from),
            confidence: Some(0.8),
        }
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.count_training_samples("u1").unwrap(), (0, 0));
        assert!(db.get_confusion_pairs("u1").unwrap().is_empty());
    }

    #[test]
    fn test_training_samples_schema() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let result: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('ml_training_samples') WHERE name IN ('id', 'user_id', 'text', 'amount', 'io', 'predicted_category_id', 'chosen_category_id', 'confidence', 'created_at')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(result, 9, "ml_training_samples should have 9 expected columns");

        let result: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('prediction_cache') WHERE name IN ('user_id', 'text_hash', 'normalized_text', 'result', 'timestamp', 'hit_count')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(result, 6, "prediction_cache should have 6 expected columns");
    }

    #[test]
    fn test_log_prediction_creates_uncorrected_row() {
        let db = Database::in_memory().unwrap();

        let id = db
            .insert_training_sample(&sample("u1", "ăn trưa 50k", Some("an_uong")))
            .unwrap();
        assert!(id > 0);

        let row = db.get_training_sample(id).unwrap().unwrap();
        assert_eq!(row.user_id, "u1");
        assert_eq!(row.text, "ăn trưa 50k");
        assert_eq!(row.amount, Some(50000.0));
        assert_eq!(row.io, Direction::Out);
        assert_eq!(row.predicted_category_id.as_deref(), Some("an_uong"));
        assert_eq!(row.chosen_category_id, None);
        assert_eq!(db.count_training_samples("u1").unwrap(), (1, 0));
    }

    #[test]
    fn test_correction_only_touches_chosen_column() {
        let db = Database::in_memory().unwrap();
        let id = db
            .insert_training_sample(&sample("u1", "grab về nhà", Some("an_uong")))
            .unwrap();
        let before = db.get_training_sample(id).unwrap().unwrap();

        db.set_chosen_category(id, "di_chuyen").unwrap();

        let after = db.get_training_sample(id).unwrap().unwrap();
        assert_eq!(after.chosen_category_id.as_deref(), Some("di_chuyen"));
        assert_eq!(
            TrainingSample {
                chosen_category_id: None,
                ..after
            },
            before
        );
    }

    #[test]
    fn test_second_correction_rejected() {
        let db = Database::in_memory().unwrap();
        let id = db
            .insert_training_sample(&sample("u1", "cà phê", None))
            .unwrap();

        db.set_chosen_category(id, "an_uong").unwrap();
        assert!(matches!(
            db.set_chosen_category(id, "mua_sam"),
            Err(Error::AlreadyCorrected(x)) if x == id
        ));
        assert_eq!(
            db.get_training_sample(id)
                .unwrap()
                .unwrap()
                .chosen_category_id
                .as_deref(),
            Some("an_uong")
        );

        assert!(matches!(
            db.set_chosen_category(9999, "an_uong"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_confusion_pairs_total_matches_corrected_rows() {
        let db = Database::in_memory().unwrap();

        let a = db
            .insert_training_sample(&sample("u1", "ăn trưa", Some("an_uong")))
            .unwrap();
        let b = db
            .insert_training_sample(&sample("u1", "grab", Some("an_uong")))
            .unwrap();
        let c = db
            .insert_training_sample(&sample("u1", "taxi", Some("an_uong")))
            .unwrap();
        let d = db.insert_training_sample(&sample("u1", "xăng", None)).unwrap();
        db.insert_training_sample(&sample("u1", "chưa sửa", Some("mua_sam")))
            .unwrap();
        let other = db
            .insert_training_sample(&sample("u2", "grab", Some("an_uong")))
            .unwrap();

        db.set_chosen_category(a, "an_uong").unwrap();
        db.set_chosen_category(b, "di_chuyen").unwrap();
        db.set_chosen_category(c, "di_chuyen").unwrap();
        db.set_chosen_category(d, "di_chuyen").unwrap();
        db.set_chosen_category(other, "di_chuyen").unwrap();

        let pairs = db.get_confusion_pairs("u1").unwrap();
        let total: i64 = pairs.iter().map(|p| p.count).sum();
        assert_eq!(total, db.count_training_samples("u1").unwrap().1);
        assert_eq!(total, 4);

        assert_eq!(
            pairs[0],
            ConfusionPair {
                predicted_category_id: Some("an_uong".into()),
                chosen_category_id: "di_chuyen".into(),
                count: 2,
            }
        );
        assert!(pairs
            .iter()
            .any(|p| p.predicted_category_id.is_none() && p.count == 1));
    }

    #[test]
    fn test_labeled_samples_per_user_in_order() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_training_sample(&sample("u1", "phở", None)).unwrap();
        let b = db.insert_training_sample(&sample("u1", "grab", None)).unwrap();
        let c = db.insert_training_sample(&sample("u2", "lương", None)).unwrap();

        db.set_chosen_category(b, "di_chuyen").unwrap();
        db.set_chosen_category(a, "an_uong").unwrap();
        db.set_chosen_category(c, "luong").unwrap();

        let labeled = db.get_labeled_samples("u1").unwrap();
        assert_eq!(
            labeled,
            vec![
                LabeledText::new("phở", "an_uong"),
                LabeledText::new("grab", "di_chuyen"),
            ]
        );

        let recent = db.list_training_samples("u1", 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, b);
    }

    #[tokio::test]
    async fn test_training_log_trait() {
        let db = Database::in_memory().unwrap();
        let log: &dyn TrainingLog = &db;

        let id = log
            .log_prediction(&sample("u1", "ăn sáng", Some("an_uong")))
            .await
            .unwrap();
        log.log_correction(id, "an_uong").await.unwrap();

        assert_eq!(log.confusion_pairs("u1").await.unwrap().len(), 1);
        assert_eq!(log.labeled_samples("u1").await.unwrap().len(), 1);
    }

    #[test]
    fn test_cache_rows() {
        let db = Database::in_memory().unwrap();

        db.upsert_cache_row("u1", "h1", "ăn trưa", "{}", 1_000).unwrap();
        let row = db.get_cache_row("u1", "h1").unwrap().unwrap();
        assert_eq!(row.hit_count, 0);
        assert_eq!(row.timestamp, 1_000);

        let hit = db
            .hit_cache_row("u1", "h1", 2_000, |row| Some(row.result.clone()))
            .unwrap();
        assert_eq!(hit, Some(("{}".to_string(), 1)));
        let row = db.get_cache_row("u1", "h1").unwrap().unwrap();
        assert_eq!(row.timestamp, 2_000);

        // Replacing the payload counts as another hit
        db.upsert_cache_row("u1", "h1", "ăn trưa", r#"{"x":1}"#, 3_000)
            .unwrap();
        let row = db.get_cache_row("u1", "h1").unwrap().unwrap();
        assert_eq!(row.hit_count, 2);
        assert_eq!(row.result, r#"{"x":1}"#);

        // Same hash under another user is a separate entry
        assert!(db.get_cache_row("u2", "h1").unwrap().is_none());
        db.upsert_cache_row("u2", "h1", "ăn trưa", "{}", 1_000).unwrap();

        assert_eq!(
            db.cache_stats("u1").unwrap(),
            CacheStats {
                entries: 1,
                total_hits: 2
            }
        );
        assert_eq!(db.clear_cache("u1").unwrap(), 1);
        assert_eq!(db.cache_stats("u1").unwrap(), CacheStats::default());
        assert_eq!(db.cache_stats("u2").unwrap().entries, 1);
    }

    #[test]
    fn test_parse_datetime() {
        let parsed = parse_datetime("2024-03-01 08:30:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T08:30:00+00:00");
        assert!(matches!(
            parse_datetime("yesterday"),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_corrupt_created_at_is_reported() {
        let db = Database::in_memory().unwrap();
        let id = db.insert_training_sample(&sample("u1", "phở", None)).unwrap();
        db.conn()
            .unwrap()
            .execute(
                "UPDATE ml_training_samples SET created_at = 'yesterday' WHERE id = ?",
                rusqlite::params![id],
            )
            .unwrap();

        let err = db.get_training_sample(id).unwrap_err();
        assert!(err.to_string().contains("yesterday"), "{}", err);
    }

    #[test]
    fn test_rejected_cache_row_is_not_touched() {
        let db = Database::in_memory().unwrap();
        db.upsert_cache_row("u1", "h1", "grab", "{}", 1_000).unwrap();

        let hit = db
            .hit_cache_row("u1", "h1", 5_000, |_| None::<()>)
            .unwrap();
        assert!(hit.is_none());
        let row = db.get_cache_row("u1", "h1").unwrap().unwrap();
        assert_eq!((row.timestamp, row.hit_count), (1_000, 0));

        // A vanished row is a plain miss
        db.clear_cache("u1").unwrap();
        let hit = db
            .hit_cache_row("u1", "h1", 6_000, |row| Some(row.hit_count))
            .unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn test_encrypted_database_requires_same_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enc.db");
        let path = path.to_string_lossy().to_string();

        {
            let db = Database::new_with_key(&path, Some("correct horse")).unwrap();
            db.insert_training_sample(&sample("u1", "phở", None)).unwrap();
        }

        let reopened = Database::new_with_key(&path, Some("correct horse")).unwrap();
        assert_eq!(reopened.count_training_samples("u1").unwrap(), (1, 0));

        assert!(Database::new_with_key(&path, Some("wrong")).is_err());
    }

    #[test]
    fn test_is_encrypted_follows_applied_key() {
        let dir = tempfile::tempdir().unwrap();
        let keyed = dir.path().join("keyed.db");
        let plain = dir.path().join("plain.db");

        let db = Database::new_with_key(&keyed.to_string_lossy(), Some("correct horse")).unwrap();
        assert!(db.is_encrypted().unwrap());

        let db = Database::new_unencrypted(&plain.to_string_lossy()).unwrap();
        assert!(!db.is_encrypted().unwrap());
        assert!(!Database::in_memory().unwrap().is_encrypted().unwrap());
    }
}
