use std::sync::Arc;
use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::repository::{FactRecordRepository, Storage, TrainingRunRepository};

mod fact_record_repo;
mod mapping;
mod migrate;
mod training_run_repo;

/// Fact records and the training-run log in one `SQLite` database.
///
/// Both repository traits are implemented on the same pool, so a record save
/// and a run write never contend for separate files.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

/// Failure to open or migrate the practice database.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteRepository {
    /// Open the practice database at `database_url`.
    ///
    /// Every connection runs with foreign keys on (responses cascade with
    /// their run), WAL journaling and a 5 s busy timeout, so a save from the
    /// tracker waits out a concurrent reader instead of failing.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the database cannot be opened or a
    /// connection pragma is rejected.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;
        debug!(database_url, "opened practice database");
        Ok(Self { pool })
    }

    /// Bring the fact-record and run-log tables up to the latest schema.
    ///
    /// Already-applied versions are skipped, so this is safe on every start.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if a migration statement fails.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Open and migrate the practice database, serving both fact records
    /// and training runs from it.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the database cannot be opened or
    /// migrated.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        info!(database_url, "practice storage ready");
        let facts: Arc<dyn FactRecordRepository> = Arc::new(repo.clone());
        let runs: Arc<dyn TrainingRunRepository> = Arc::new(repo);
        Ok(Self { facts, runs })
    }
}
