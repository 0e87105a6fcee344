use facts_core::model::{FactResponse, RunStatus, TrainingRun};
use sqlx::{Sqlite, Transaction};

use super::{
    SqliteRepository,
    mapping::{map_response_row, map_run_row, outcome_as_str, u64_to_i64},
};
use crate::repository::{StorageError, TrainingRunRepository};

fn db_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Conflict("another run is already in progress".into())
        }
        _ => StorageError::Connection(e.to_string()),
    }
}

/// Writes the run row and replaces its responses inside `tx`.
async fn write_run(tx: &mut Transaction<'_, Sqlite>, run: &TrainingRun) -> Result<(), StorageError> {
    let run_id = run.id().to_string();

    let written = sqlx::query(
        r"
        INSERT INTO training_runs (id, started_at, finished_at, score, status)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET
            finished_at = excluded.finished_at,
            score = excluded.score,
            status = excluded.status
        WHERE training_runs.status = 'in_progress'
        ",
    )
    .bind(&run_id)
    .bind(run.started_at())
    .bind(run.finished_at())
    .bind(run.score())
    .bind(run.status().as_str())
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    if written.rows_affected() == 0 {
        return Err(StorageError::Conflict(format!("run {run_id} is already completed")));
    }

    sqlx::query("DELETE FROM fact_responses WHERE run_id = ?1")
        .bind(&run_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

    for (seq, response) in run.responses().iter().enumerate() {
        let snap = &response.snapshot;
        sqlx::query(
            r"
            INSERT INTO fact_responses (
                run_id, seq, multiplicand, multiplier, outcome, response_time_ms, answered_at,
                snap_attempts, snap_correct_count, snap_wrong_count, snap_streak,
                snap_avg_time_secs, snap_leitner_box, snap_difficulty_rating,
                snap_last_practiced, snap_next_practice_due
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ",
        )
        .bind(&run_id)
        .bind(
            i64::try_from(seq).map_err(|_| StorageError::Serialization("seq overflow".into()))?,
        )
        .bind(i64::from(response.fact.multiplicand()))
        .bind(i64::from(response.fact.multiplier()))
        .bind(outcome_as_str(response.outcome))
        .bind(u64_to_i64("response_time_ms", response.response_time_ms)?)
        .bind(response.answered_at)
        .bind(i64::from(snap.attempts))
        .bind(i64::from(snap.correct_count))
        .bind(i64::from(snap.wrong_count))
        .bind(i64::from(snap.streak))
        .bind(snap.avg_time_secs)
        .bind(i64::from(snap.leitner_box.value()))
        .bind(snap.difficulty_rating)
        .bind(snap.last_practiced)
        .bind(snap.next_practice_due)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }

    Ok(())
}

impl SqliteRepository {
    async fn load_responses(&self, run_id: &str) -> Result<Vec<FactResponse>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                multiplicand, multiplier, outcome, response_time_ms, answered_at,
                snap_attempts, snap_correct_count, snap_wrong_count, snap_streak,
                snap_avg_time_secs, snap_leitner_box, snap_difficulty_rating,
                snap_last_practiced, snap_next_practice_due
            FROM fact_responses
            WHERE run_id = ?1
            ORDER BY seq ASC
            ",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_response_row).collect()
    }

    async fn hydrate(&self, row: &sqlx::sqlite::SqliteRow) -> Result<TrainingRun, StorageError> {
        use sqlx::Row;
        let id: String = row
            .try_get("id")
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let responses = self.load_responses(&id).await?;
        map_run_row(row, responses)
    }
}

#[async_trait::async_trait]
impl TrainingRunRepository for SqliteRepository {
    async fn save_active_run(&self, run: &TrainingRun) -> Result<(), StorageError> {
        if run.status() != RunStatus::InProgress {
            return Err(StorageError::Conflict(format!("run {} is not in progress", run.id())));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        write_run(&mut tx, run).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn load_active_run(&self) -> Result<Option<TrainingRun>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, started_at, finished_at, score, status
            FROM training_runs
            WHERE status = 'in_progress'
            ",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn archive_run(&self, run: &TrainingRun, keep: u32) -> Result<(), StorageError> {
        if run.status() != RunStatus::Completed {
            return Err(StorageError::Conflict(format!("run {} is not completed", run.id())));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        write_run(&mut tx, run).await?;

        let trimmed = sqlx::query(
            r"
            DELETE FROM training_runs
            WHERE status = 'completed' AND id NOT IN (
                SELECT id FROM training_runs
                WHERE status = 'completed'
                ORDER BY finished_at DESC, id DESC
                LIMIT ?1
            )
            ",
        )
        .bind(i64::from(keep))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(
            run_id = %run.id(),
            trimmed = trimmed.rows_affected(),
            "archived training run"
        );
        Ok(())
    }

    async fn list_completed_runs(&self, limit: u32) -> Result<Vec<TrainingRun>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, started_at, finished_at, score, status
            FROM training_runs
            WHERE status = 'completed'
            ORDER BY finished_at DESC, id DESC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.hydrate(row).await?);
        }
        Ok(out)
    }
}
