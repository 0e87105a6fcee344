use facts_core::model::FactRecordSet;

use super::{SqliteRepository, mapping::map_fact_record_row};
use crate::repository::{FactRecordRepository, StorageError};

#[async_trait::async_trait]
impl FactRecordRepository for SqliteRepository {
    async fn load_records(&self) -> Result<FactRecordSet, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                multiplicand, multiplier, attempts, correct_count, wrong_count, streak,
                avg_time_secs, leitner_box, difficulty_rating, last_practiced, next_practice_due
            FROM fact_records
            ORDER BY multiplicand ASC, multiplier ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        rows.iter().map(map_fact_record_row).collect()
    }

    async fn save_records(&self, records: &FactRecordSet) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        for record in records {
            sqlx::query(
                r"
                INSERT INTO fact_records (
                    multiplicand, multiplier, attempts, correct_count, wrong_count, streak,
                    avg_time_secs, leitner_box, difficulty_rating, last_practiced,
                    next_practice_due
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(multiplicand, multiplier) DO UPDATE SET
                    attempts = excluded.attempts,
                    correct_count = excluded.correct_count,
                    wrong_count = excluded.wrong_count,
                    streak = excluded.streak,
                    avg_time_secs = excluded.avg_time_secs,
                    leitner_box = excluded.leitner_box,
                    difficulty_rating = excluded.difficulty_rating,
                    last_practiced = excluded.last_practiced,
                    next_practice_due = excluded.next_practice_due
                ",
            )
            .bind(i64::from(record.fact.multiplicand()))
            .bind(i64::from(record.fact.multiplier()))
            .bind(i64::from(record.attempts))
            .bind(i64::from(record.correct_count))
            .bind(i64::from(record.wrong_count))
            .bind(i64::from(record.streak))
            .bind(record.avg_time_secs)
            .bind(i64::from(record.leitner_box.value()))
            .bind(record.difficulty_rating)
            .bind(record.last_practiced)
            .bind(record.next_practice_due)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        tracing::debug!(records = records.len(), "saved fact records");
        Ok(())
    }
}
