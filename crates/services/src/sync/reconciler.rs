use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use facts_core::Catalog;
use facts_core::model::{FactRecordSet, TrainingRun};

use super::remote::{
    FactRow, RemoteStore, SessionFactRow, SessionRow, UserFactRow, insert_rows, upsert_rows,
};
use crate::error::RemoteError;

/// Rows sent per remote request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Outcome of one reconciliation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Every row reached the remote store.
    Synced { rows: usize },
    /// Nothing was sent: the reconciler is (now) local-only.
    LocalOnly,
    /// Nothing was sent: a newer snapshot already reached the remote store.
    Superseded,
}

/// Pushes local progress to the remote store.
///
/// The first remote failure trips a breaker that keeps the reconciler
/// local-only for the rest of the process. Calls never return errors.
///
/// Record snapshots are numbered when a sync is requested and sent one at a
/// time; a snapshot older than the last one sent is dropped, so the remote
/// aggregate always ends on the newest local state.
#[derive(Clone)]
pub struct SyncReconciler {
    remote: Option<Arc<dyn RemoteStore>>,
    user_id: Uuid,
    catalog: Catalog,
    batch_size: usize,
    local_only: Arc<AtomicBool>,
    catalog_seeded: Arc<OnceCell<()>>,
    facts_generation: Arc<AtomicU64>,
    facts_sent: Arc<Mutex<u64>>,
}

impl SyncReconciler {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, user_id: Uuid, catalog: Catalog) -> Self {
        Self {
            remote: Some(remote),
            user_id,
            catalog,
            batch_size: DEFAULT_BATCH_SIZE,
            local_only: Arc::new(AtomicBool::new(false)),
            catalog_seeded: Arc::new(OnceCell::new()),
            facts_generation: Arc::new(AtomicU64::new(0)),
            facts_sent: Arc::new(Mutex::new(0)),
        }
    }

    /// A reconciler with nowhere to sync to.
    #[must_use]
    pub fn local_only() -> Self {
        Self {
            remote: None,
            user_id: Uuid::nil(),
            catalog: Catalog::standard(),
            batch_size: DEFAULT_BATCH_SIZE,
            local_only: Arc::new(AtomicBool::new(true)),
            catalog_seeded: Arc::new(OnceCell::new()),
            facts_generation: Arc::new(AtomicU64::new(0)),
            facts_sent: Arc::new(Mutex::new(0)),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.local_only.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Upsert the full aggregate of every record for this user.
    pub async fn sync_facts(&self, records: &FactRecordSet) -> SyncStatus {
        let generation = self.next_generation();
        self.sync_facts_generation(generation, records).await
    }

    fn next_generation(&self) -> u64 {
        self.facts_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn sync_facts_generation(
        &self,
        generation: u64,
        records: &FactRecordSet,
    ) -> SyncStatus {
        if self.active_remote().is_none() {
            return SyncStatus::LocalOnly;
        }
        let mut sent = self.facts_sent.lock().await;
        if *sent > generation {
            debug!(generation, latest = *sent, "skipping superseded fact snapshot");
            return SyncStatus::Superseded;
        }
        // The breaker may have tripped while waiting for the lock.
        let Some(remote) = self.active_remote() else {
            return SyncStatus::LocalOnly;
        };
        let rows: Vec<UserFactRow> = records
            .iter()
            .map(|record| UserFactRow::from_record(self.user_id, record))
            .collect();

        let result = async {
            self.seed_catalog(remote).await?;
            for chunk in rows.chunks(self.batch_size) {
                upsert_rows(remote, chunk).await?;
            }
            Ok::<_, RemoteError>(rows.len())
        }
        .await;

        if result.is_ok() {
            *sent = generation;
        }
        self.settle("sync_facts", result)
    }

    /// Append an immutable snapshot of a completed run and its responses.
    pub async fn sync_run(&self, run: &TrainingRun) -> SyncStatus {
        let Some(remote) = self.active_remote() else {
            return SyncStatus::LocalOnly;
        };
        let session = SessionRow::from_run(self.user_id, run);
        let events: Vec<SessionFactRow> = run
            .responses()
            .iter()
            .map(|response| SessionFactRow::from_response(session.id, response))
            .collect();

        let result = async {
            self.seed_catalog(remote).await?;
            insert_rows(remote, std::slice::from_ref(&session)).await?;
            for chunk in events.chunks(self.batch_size) {
                insert_rows(remote, chunk).await?;
            }
            Ok::<_, RemoteError>(events.len() + 1)
        }
        .await;

        self.settle("sync_run", result)
    }

    /// Runs [`Self::sync_facts`] as a detached task.
    ///
    /// The snapshot is numbered here, in call order, not when the task runs.
    /// Returns `None` without spawning when local-only or when no tokio
    /// runtime is current.
    #[must_use]
    pub fn spawn_sync_facts(&self, records: FactRecordSet) -> Option<JoinHandle<SyncStatus>> {
        let generation = self.next_generation();
        let sync = self.clone();
        self.spawn_detached("sync_facts", async move {
            sync.sync_facts_generation(generation, &records).await
        })
    }

    /// Runs [`Self::sync_run`] as a detached task.
    #[must_use]
    pub fn spawn_sync_run(&self, run: TrainingRun) -> Option<JoinHandle<SyncStatus>> {
        let sync = self.clone();
        self.spawn_detached("sync_run", async move { sync.sync_run(&run).await })
    }

    fn spawn_detached<F>(
        &self,
        operation: &'static str,
        task: F,
    ) -> Option<JoinHandle<SyncStatus>>
    where
        F: Future<Output = SyncStatus> + Send + 'static,
    {
        if self.is_local_only() {
            return None;
        }
        match Handle::try_current() {
            Ok(handle) => Some(handle.spawn(task)),
            Err(_) => {
                warn!(operation, "no async runtime available; skipping remote sync");
                None
            }
        }
    }

    fn active_remote(&self) -> Option<&dyn RemoteStore> {
        if self.is_local_only() {
            return None;
        }
        self.remote.as_deref()
    }

    /// Makes sure the referenced fact identities exist remotely, once per process.
    async fn seed_catalog(&self, remote: &dyn RemoteStore) -> Result<(), RemoteError> {
        self.catalog_seeded
            .get_or_try_init(|| async {
                let rows: Vec<FactRow> = self.catalog.all_items().map(FactRow::from).collect();
                for chunk in rows.chunks(self.batch_size) {
                    upsert_rows(remote, chunk).await?;
                }
                debug!(facts = rows.len(), "seeded remote catalog");
                Ok::<_, RemoteError>(())
            })
            .await
            .map(|_| ())
    }

    fn settle(&self, operation: &'static str, result: Result<usize, RemoteError>) -> SyncStatus {
        match result {
            Ok(rows) => {
                info!(operation, rows, "remote sync complete");
                SyncStatus::Synced { rows }
            }
            Err(error) => {
                if !self.local_only.swap(true, Ordering::SeqCst) {
                    warn!(operation, %error, "remote sync failed; continuing local-only");
                }
                SyncStatus::LocalOnly
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::remote::{EqFilter, query_rows};
    use crate::sync::InMemoryRemoteStore;
    use async_trait::async_trait;
    use facts_core::model::{FactKey, FactResponse, ResponseOutcome, RunId};
    use facts_core::time::fixed_now;
    use serde_json::Value;
    use std::time::Duration;

    /// Holds back its first aggregate upsert so a later one can overtake it.
    struct SlowFirstAggregate {
        inner: InMemoryRemoteStore,
        delayed: AtomicBool,
    }

    #[async_trait]
    impl RemoteStore for SlowFirstAggregate {
        async fn upsert(
            &self,
            table: &str,
            conflict_key: &str,
            rows: &[Value],
        ) -> Result<(), RemoteError> {
            if table == "user_facts" && !self.delayed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.inner.upsert(table, conflict_key, rows).await
        }

        async fn insert(&self, table: &str, rows: &[Value]) -> Result<(), RemoteError> {
            self.inner.insert(table, rows).await
        }

        async fn query(
            &self,
            table: &str,
            filters: &[EqFilter<'_>],
        ) -> Result<Vec<Value>, RemoteError> {
            self.inner.query(table, filters).await
        }
    }

    /// Records for the 3x3 catalog with (1,1) answered correctly `times` times.
    fn answered(times: usize) -> FactRecordSet {
        let mut records = small_records();
        if let Some(record) = records.get_mut(FactKey::new(1, 1)) {
            for _ in 0..times {
                record.apply_response(ResponseOutcome::Correct, 1_000, fixed_now());
            }
        }
        records
    }

    async fn remote_correct_count(store: &InMemoryRemoteStore) -> i64 {
        let filter = ("fact_id", FactKey::new(1, 1).remote_id().to_string());
        let rows: Vec<UserFactRow> = query_rows(store, &[filter]).await.unwrap();
        assert_eq!(rows.len(), 1);
        rows[0].correct_count
    }

    fn reconciler(store: &InMemoryRemoteStore) -> SyncReconciler {
        SyncReconciler::new(
            Arc::new(store.clone()),
            Uuid::from_u128(0x42),
            Catalog::with_range(1, 3).unwrap(),
        )
    }

    fn small_records() -> FactRecordSet {
        FactRecordSet::defaults_for(&Catalog::with_range(1, 3).unwrap(), fixed_now())
    }

    #[tokio::test]
    async fn sync_facts_upserts_catalog_once_and_aggregates_each_time() {
        let store = InMemoryRemoteStore::new();
        let sync = reconciler(&store);
        let records = small_records();

        assert_eq!(sync.sync_facts(&records).await, SyncStatus::Synced { rows: 9 });
        assert_eq!(sync.sync_facts(&records).await, SyncStatus::Synced { rows: 9 });

        assert_eq!(store.rows("facts").len(), 9);
        assert_eq!(store.rows("user_facts").len(), 9);
        let catalog_writes = store.calls().iter().filter(|c| *c == "upsert facts").count();
        assert_eq!(catalog_writes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_older_snapshot_never_lands_after_newer_one() {
        let store = InMemoryRemoteStore::new();
        let slow = SlowFirstAggregate {
            inner: store.clone(),
            delayed: AtomicBool::new(false),
        };
        let sync = SyncReconciler::new(
            Arc::new(slow),
            Uuid::from_u128(0x42),
            Catalog::with_range(1, 3).unwrap(),
        );

        let older = sync.spawn_sync_facts(answered(1)).expect("spawned");
        let newer = sync.spawn_sync_facts(answered(2)).expect("spawned");
        assert_eq!(newer.await.unwrap(), SyncStatus::Synced { rows: 9 });
        assert_eq!(older.await.unwrap(), SyncStatus::Synced { rows: 9 });

        assert_eq!(remote_correct_count(&store).await, 2);
    }

    #[tokio::test]
    async fn stale_snapshot_is_dropped_once_newer_one_was_sent() {
        let store = InMemoryRemoteStore::new();
        let sync = reconciler(&store);

        let stale = sync.next_generation();
        assert_eq!(sync.sync_facts(&answered(2)).await, SyncStatus::Synced { rows: 9 });
        assert_eq!(
            sync.sync_facts_generation(stale, &answered(1)).await,
            SyncStatus::Superseded
        );

        assert_eq!(remote_correct_count(&store).await, 2);
        assert!(!sync.is_local_only());
    }

    #[tokio::test]
    async fn batches_rows() {
        let store = InMemoryRemoteStore::new();
        let sync = reconciler(&store).with_batch_size(4);
        let records = small_records();

        sync.sync_facts(&records).await;
        let aggregate_writes = store
            .calls()
            .iter()
            .filter(|c| *c == "upsert user_facts")
            .count();
        assert_eq!(aggregate_writes, 3);
    }

    #[tokio::test]
    async fn failure_trips_breaker_for_good() {
        let store = InMemoryRemoteStore::new();
        let sync = reconciler(&store);
        let records = small_records();

        store.set_failing(true);
        assert_eq!(sync.sync_facts(&records).await, SyncStatus::LocalOnly);
        assert!(sync.is_local_only());

        store.set_failing(false);
        let calls_before = store.calls().len();
        assert_eq!(sync.sync_facts(&records).await, SyncStatus::LocalOnly);
        assert_eq!(store.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn sync_run_appends_session_and_events() {
        let store = InMemoryRemoteStore::new();
        let sync = reconciler(&store);
        let now = fixed_now();
        let fact = FactKey::new(2, 3);
        let mut run = TrainingRun::start(RunId::generate(), now);
        for outcome in [ResponseOutcome::Correct, ResponseOutcome::TimedOut] {
            let response = FactResponse {
                fact,
                snapshot: facts_core::model::FactRecord::new(fact, now).snapshot(),
                outcome,
                response_time_ms: 1_000,
                answered_at: now,
            };
            run.push_response(response, 0).unwrap();
        }
        run.complete(now).unwrap();

        assert_eq!(sync.sync_run(&run).await, SyncStatus::Synced { rows: 3 });
        let sessions = store.rows("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["id"], run.id().to_string());
        assert_eq!(store.rows("session_facts").len(), 2);
    }

    #[tokio::test]
    async fn spawned_sync_can_be_awaited() {
        let store = InMemoryRemoteStore::new();
        let sync = reconciler(&store);
        let handle = sync.spawn_sync_facts(small_records()).expect("spawned");
        assert_eq!(handle.await.unwrap(), SyncStatus::Synced { rows: 9 });
    }

    #[test]
    fn spawn_without_runtime_is_skipped() {
        let store = InMemoryRemoteStore::new();
        let sync = reconciler(&store);
        assert!(sync.spawn_sync_facts(small_records()).is_none());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn local_only_reconciler_never_calls_out() {
        let sync = SyncReconciler::local_only();
        assert!(sync.is_local_only());
        assert_eq!(sync.sync_facts(&FactRecordSet::new()).await, SyncStatus::LocalOnly);
    }
}
