use std::sync::Arc;

use tracing::info;

use facts_core::model::TrainingRun;
use facts_core::{Catalog, SchedulingEngine};
use storage::repository::{Storage, StorageError, TrainingRunRepository};

use crate::Clock;
use crate::config::CoreConfig;
use crate::error::PracticeServicesError;
use crate::progress_store::ProgressStore;
use crate::session::{SessionTracker, TrackerSettings};
use crate::sync::{RestRemoteStore, SyncReconciler};

/// Assembles the practice services from configuration and storage.
#[derive(Clone)]
pub struct PracticeServices {
    config: CoreConfig,
    clock: Clock,
    storage: Storage,
    progress: ProgressStore,
}

impl PracticeServices {
    /// Build services backed by `SQLite` storage at `config.db_url`.
    ///
    /// # Errors
    ///
    /// Returns `PracticeServicesError` if storage initialization fails or the
    /// remote endpoint cannot be set up.
    pub async fn new_sqlite(config: CoreConfig, clock: Clock) -> Result<Self, PracticeServicesError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        Self::from_storage(config, clock, storage)
    }

    /// In-memory storage and no remote sync.
    #[must_use]
    pub fn in_memory(config: CoreConfig, clock: Clock) -> Self {
        Self::from_parts(config, clock, Storage::in_memory(), SyncReconciler::local_only())
    }

    /// Wire services over existing storage, syncing remotely when the
    /// configuration names an endpoint and a user.
    ///
    /// # Errors
    ///
    /// Returns `PracticeServicesError::Remote` if the HTTP client cannot be
    /// built.
    pub fn from_storage(
        config: CoreConfig,
        clock: Clock,
        storage: Storage,
    ) -> Result<Self, PracticeServicesError> {
        let sync = match config.remote_sync() {
            Some((endpoint, user_id)) => {
                let remote = RestRemoteStore::new(endpoint)?;
                info!(%user_id, base_url = %endpoint.base_url, "remote sync enabled");
                SyncReconciler::new(Arc::new(remote), user_id, Catalog::standard())
            }
            None => {
                info!("remote sync not configured; running local-only");
                SyncReconciler::local_only()
            }
        };
        Ok(Self::from_parts(config, clock, storage, sync))
    }

    #[must_use]
    pub fn from_parts(
        config: CoreConfig,
        clock: Clock,
        storage: Storage,
        sync: SyncReconciler,
    ) -> Self {
        let progress = ProgressStore::new(
            Catalog::standard(),
            clock,
            Arc::clone(&storage.facts),
            sync,
        );
        Self {
            config,
            clock,
            storage,
            progress,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    #[must_use]
    pub fn reconciler(&self) -> &SyncReconciler {
        self.progress.reconciler()
    }

    #[must_use]
    pub fn engine(&self) -> SchedulingEngine {
        SchedulingEngine::new(self.progress.catalog().clone())
    }

    /// Load progress and return a tracker, resuming any unfinished run.
    pub async fn open_tracker(&self) -> SessionTracker {
        SessionTracker::open(
            self.clock,
            TrackerSettings::from(&self.config),
            self.progress.clone(),
            Arc::clone(&self.storage.runs),
        )
        .await
    }

    /// Most recently finished runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the run log cannot be read.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<TrainingRun>, StorageError> {
        self.storage.runs.list_completed_runs(limit).await
    }
}
