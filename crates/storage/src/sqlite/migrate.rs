use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the schema migrations that have not been applied yet.
///
/// Version 1 creates the fact records, the training-run log and its
/// per-response rows.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS fact_records (
                    multiplicand INTEGER NOT NULL CHECK (multiplicand BETWEEN 1 AND 255),
                    multiplier INTEGER NOT NULL CHECK (multiplier BETWEEN 1 AND 255),
                    attempts INTEGER NOT NULL CHECK (attempts >= 0),
                    correct_count INTEGER NOT NULL CHECK (correct_count >= 0),
                    wrong_count INTEGER NOT NULL CHECK (wrong_count >= 0),
                    streak INTEGER NOT NULL CHECK (streak >= 0),
                    avg_time_secs REAL NOT NULL CHECK (avg_time_secs >= 0),
                    leitner_box INTEGER NOT NULL CHECK (leitner_box BETWEEN 1 AND 5),
                    difficulty_rating REAL NOT NULL CHECK (difficulty_rating BETWEEN 1 AND 10),
                    last_practiced TEXT,
                    next_practice_due TEXT NOT NULL,
                    PRIMARY KEY (multiplicand, multiplier),
                    CHECK (attempts = correct_count + wrong_count)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS training_runs (
                    id TEXT PRIMARY KEY,
                    started_at TEXT NOT NULL,
                    finished_at TEXT,
                    score INTEGER NOT NULL,
                    status TEXT NOT NULL CHECK (status IN ('in_progress', 'completed')),
                    CHECK (finished_at IS NULL OR finished_at >= started_at)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        // At most one run may be in progress at a time.
        sqlx::query(
            r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_training_runs_single_active
                    ON training_runs (status) WHERE status = 'in_progress';
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_training_runs_finished
                    ON training_runs (finished_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS fact_responses (
                    run_id TEXT NOT NULL,
                    seq INTEGER NOT NULL CHECK (seq >= 0),
                    multiplicand INTEGER NOT NULL,
                    multiplier INTEGER NOT NULL,
                    outcome TEXT NOT NULL CHECK (outcome IN ('correct', 'wrong', 'timed_out')),
                    response_time_ms INTEGER NOT NULL CHECK (response_time_ms >= 0),
                    answered_at TEXT NOT NULL,
                    snap_attempts INTEGER NOT NULL,
                    snap_correct_count INTEGER NOT NULL,
                    snap_wrong_count INTEGER NOT NULL,
                    snap_streak INTEGER NOT NULL,
                    snap_avg_time_secs REAL NOT NULL,
                    snap_leitner_box INTEGER NOT NULL CHECK (snap_leitner_box BETWEEN 1 AND 5),
                    snap_difficulty_rating REAL NOT NULL,
                    snap_last_practiced TEXT,
                    snap_next_practice_due TEXT NOT NULL,
                    PRIMARY KEY (run_id, seq),
                    FOREIGN KEY (run_id) REFERENCES training_runs(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}
