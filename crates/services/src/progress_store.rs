use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use facts_core::model::FactRecordSet;
use facts_core::{Catalog, Clock};
use storage::repository::FactRecordRepository;

use crate::sync::{SyncReconciler, SyncStatus};

/// Where the last save ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Persisted,
    /// Local storage failed earlier; progress lives only in this process.
    MemoryOnly,
}

/// Result of [`ProgressStore::save`].
#[derive(Debug)]
pub struct SaveReport {
    pub durability: Durability,
    /// The detached remote sync, if one was started. Nothing waits on it.
    pub sync: Option<JoinHandle<SyncStatus>>,
}

#[derive(Default)]
struct StoreState {
    snapshot: Option<FactRecordSet>,
    memory_only: bool,
}

/// Owns the learner's fact records.
///
/// Local persistence failures never reach the caller: the store logs them
/// and keeps working from memory for the rest of the process.
#[derive(Clone)]
pub struct ProgressStore {
    catalog: Catalog,
    clock: Clock,
    repo: Arc<dyn FactRecordRepository>,
    sync: SyncReconciler,
    state: Arc<Mutex<StoreState>>,
}

impl ProgressStore {
    #[must_use]
    pub fn new(
        catalog: Catalog,
        clock: Clock,
        repo: Arc<dyn FactRecordRepository>,
        sync: SyncReconciler,
    ) -> Self {
        Self {
            catalog,
            clock,
            repo,
            sync,
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn reconciler(&self) -> &SyncReconciler {
        &self.sync
    }

    #[must_use]
    pub fn is_memory_only(&self) -> bool {
        self.lock().memory_only
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current records, one per catalog fact.
    ///
    /// The first load initializes and persists default records for every
    /// catalog fact that has none.
    pub async fn load(&self) -> FactRecordSet {
        if let Some(snapshot) = self.lock().snapshot.clone() {
            return snapshot;
        }

        let now = self.clock.now();
        let mut records = match self.repo.load_records().await {
            Ok(records) => records,
            Err(error) => {
                warn!(%error, "could not load fact records; using defaults in memory");
                let defaults = FactRecordSet::defaults_for(&self.catalog, now);
                let mut state = self.lock();
                state.memory_only = true;
                state.snapshot = Some(defaults.clone());
                return defaults;
            }
        };

        let created = records.fill_missing(&self.catalog, now);
        if created > 0 {
            info!(created, "initialized fact records");
            self.persist(&records).await;
        }
        self.lock().snapshot = Some(records.clone());
        records
    }

    /// Persist the full record set and start a background remote sync.
    ///
    /// Saving a set identical to the last one skips the local write.
    pub async fn save(&self, records: &FactRecordSet) -> SaveReport {
        let unchanged = self.lock().snapshot.as_ref() == Some(records);
        let durability = if unchanged {
            debug!("fact records unchanged; skipping local write");
            self.durability()
        } else {
            let durability = self.persist(records).await;
            self.lock().snapshot = Some(records.clone());
            durability
        };

        SaveReport {
            durability,
            sync: self.sync.spawn_sync_facts(records.clone()),
        }
    }

    fn durability(&self) -> Durability {
        if self.is_memory_only() {
            Durability::MemoryOnly
        } else {
            Durability::Persisted
        }
    }

    async fn persist(&self, records: &FactRecordSet) -> Durability {
        if self.is_memory_only() {
            return Durability::MemoryOnly;
        }
        match self.repo.save_records(records).await {
            Ok(()) => Durability::Persisted,
            Err(error) => {
                warn!(%error, "could not persist fact records; continuing in memory");
                self.lock().memory_only = true;
                Durability::MemoryOnly
            }
        }
    }
}
