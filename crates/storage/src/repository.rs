use async_trait::async_trait;
use facts_core::model::{FactRecordSet, RunStatus, TrainingRun};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persistence for the per-fact mastery records.
///
/// Writes are whole snapshots: `save_records` stores every record in the
/// set and never deletes records absent from it.
#[async_trait]
pub trait FactRecordRepository: Send + Sync {
    /// Load every persisted record. An empty set means nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store is unreachable or a row
    /// fails validation.
    async fn load_records(&self) -> Result<FactRecordSet, StorageError>;

    /// Persist the full record set.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be written.
    async fn save_records(&self, records: &FactRecordSet) -> Result<(), StorageError>;
}

/// Persistence for the training-run log: at most one in-progress run plus a
/// bounded history of completed runs.
#[async_trait]
pub trait TrainingRunRepository: Send + Sync {
    /// Store the in-progress run, replacing any earlier state of the same run.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the run is not in progress or a
    /// different run is already in progress.
    async fn save_active_run(&self, run: &TrainingRun) -> Result<(), StorageError>;

    /// The in-progress run, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or mapping failures.
    async fn load_active_run(&self) -> Result<Option<TrainingRun>, StorageError>;

    /// Move a completed run into history, keeping only the `keep` most
    /// recently finished runs.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the run is not completed.
    async fn archive_run(&self, run: &TrainingRun, keep: u32) -> Result<(), StorageError>;

    /// Completed runs, most recently finished first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or mapping failures.
    async fn list_completed_runs(&self, limit: u32) -> Result<Vec<TrainingRun>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<Mutex<FactRecordSet>>,
    active: Arc<Mutex<Option<TrainingRun>>>,
    history: Arc<Mutex<VecDeque<TrainingRun>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl FactRecordRepository for InMemoryRepository {
    async fn load_records(&self) -> Result<FactRecordSet, StorageError> {
        let guard = self.records.lock().map_err(poisoned)?;
        Ok(guard.clone())
    }

    async fn save_records(&self, records: &FactRecordSet) -> Result<(), StorageError> {
        let mut guard = self.records.lock().map_err(poisoned)?;
        for record in records {
            guard.insert(record.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl TrainingRunRepository for InMemoryRepository {
    async fn save_active_run(&self, run: &TrainingRun) -> Result<(), StorageError> {
        if run.status() != RunStatus::InProgress {
            return Err(StorageError::Conflict(format!("run {} is not in progress", run.id())));
        }
        let mut guard = self.active.lock().map_err(poisoned)?;
        if let Some(existing) = guard.as_ref() {
            if existing.id() != run.id() {
                return Err(StorageError::Conflict(format!(
                    "run {} is already in progress",
                    existing.id()
                )));
            }
        }
        *guard = Some(run.clone());
        Ok(())
    }

    async fn load_active_run(&self) -> Result<Option<TrainingRun>, StorageError> {
        let guard = self.active.lock().map_err(poisoned)?;
        Ok(guard.clone())
    }

    async fn archive_run(&self, run: &TrainingRun, keep: u32) -> Result<(), StorageError> {
        if run.status() != RunStatus::Completed {
            return Err(StorageError::Conflict(format!("run {} is not completed", run.id())));
        }
        {
            let mut active = self.active.lock().map_err(poisoned)?;
            if active.as_ref().is_some_and(|a| a.id() == run.id()) {
                *active = None;
            }
        }

        let mut history = self.history.lock().map_err(poisoned)?;
        if history.iter().any(|r| r.id() == run.id()) {
            return Err(StorageError::Conflict(format!("run {} is already archived", run.id())));
        }
        history.push_front(run.clone());
        history
            .make_contiguous()
            .sort_by(|a, b| b.finished_at().cmp(&a.finished_at()));
        history.truncate(usize::try_from(keep).unwrap_or(usize::MAX));
        Ok(())
    }

    async fn list_completed_runs(&self, limit: u32) -> Result<Vec<TrainingRun>, StorageError> {
        let history = self.history.lock().map_err(poisoned)?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(history.iter().take(limit).cloned().collect())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub facts: Arc<dyn FactRecordRepository>,
    pub runs: Arc<dyn TrainingRunRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let facts: Arc<dyn FactRecordRepository> = Arc::new(repo.clone());
        let runs: Arc<dyn TrainingRunRepository> = Arc::new(repo);
        Self { facts, runs }
    }
}
