use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use facts_core::Clock;
use facts_core::model::{
    FactKey, FactRecord, FactRecordSet, FactResponse, ResponseOutcome, RunId, RunSummary,
    TrainingRun,
};
use storage::repository::TrainingRunRepository;

use super::alarm::{AlarmState, Expiry, ResponseAlarm};
use crate::config::{CoreConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_RESPONSE_WINDOW, DEFAULT_TARGET_SCORE};
use crate::error::SessionError;
use crate::progress_store::{Durability, ProgressStore};
use crate::sync::{SyncReconciler, SyncStatus};

pub const CORRECT_SCORE: i64 = 10;
pub const INCORRECT_SCORE: i64 = -5;

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    InProgress,
    Completed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::InProgress => "in progress",
            SessionState::Completed => "completed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub target_score: i64,
    pub response_window: Duration,
    pub history_limit: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            target_score: DEFAULT_TARGET_SCORE,
            response_window: DEFAULT_RESPONSE_WINDOW,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl From<&CoreConfig> for TrackerSettings {
    fn from(config: &CoreConfig) -> Self {
        Self {
            target_score: config.target_score,
            response_window: config.response_window,
            history_limit: config.history_limit,
        }
    }
}

/// What one recorded response changed.
#[derive(Debug)]
pub struct ResponseReceipt {
    pub response: FactResponse,
    /// The fact's record after the update.
    pub record: FactRecord,
    pub score: i64,
    /// Set only on the response that first lifts the score to the target.
    pub reached_target: bool,
    /// `MemoryOnly` once either the fact records or the run log stopped
    /// reaching local storage.
    pub durability: Durability,
    pub sync: Option<JoinHandle<SyncStatus>>,
}

/// A run closed by [`SessionTracker::finish`].
#[derive(Debug)]
pub struct FinishedRun {
    pub run: TrainingRun,
    pub summary: RunSummary,
    /// Whether the run made it into the local history.
    pub durability: Durability,
    pub sync: Option<JoinHandle<SyncStatus>>,
}

#[derive(Debug)]
struct PendingResponse {
    fact: FactKey,
    alarm: ResponseAlarm,
}

//
// ─── TRACKER ───────────────────────────────────────────────────────────────────
//

/// Drives one learner's practice runs: `Idle -> InProgress -> Completed`.
///
/// The tracker is the single writer of the fact records and of the active
/// run; callers own it and pass it around explicitly.
///
/// Run-log failures are handled like fact-record failures: logged once, then
/// the run lives in memory for the rest of the process.
pub struct SessionTracker {
    clock: Clock,
    settings: TrackerSettings,
    store: ProgressStore,
    runs: Arc<dyn TrainingRunRepository>,
    sync: SyncReconciler,
    records: FactRecordSet,
    run: Option<TrainingRun>,
    state: SessionState,
    pending: Option<PendingResponse>,
    last_fact: Option<FactKey>,
    run_log_memory_only: bool,
}

impl SessionTracker {
    /// Load progress and resume a persisted in-progress run, if any.
    ///
    /// An unreadable run log starts the tracker idle and memory-only.
    pub async fn open(
        clock: Clock,
        settings: TrackerSettings,
        store: ProgressStore,
        runs: Arc<dyn TrainingRunRepository>,
    ) -> Self {
        let records = store.load().await;
        let (run, run_log_memory_only) = match runs.load_active_run().await {
            Ok(run) => (run, false),
            Err(error) => {
                warn!(%error, "could not read the training run log; runs stay in memory");
                (None, true)
            }
        };
        let state = if run.is_some() {
            SessionState::InProgress
        } else {
            SessionState::Idle
        };
        if let Some(run) = &run {
            info!(run_id = %run.id(), responses = run.responses().len(), "resumed training run");
        }
        let last_fact = run
            .as_ref()
            .and_then(|r| r.responses().last())
            .map(|r| r.fact);

        Self {
            clock,
            settings,
            sync: store.reconciler().clone(),
            store,
            runs,
            records,
            run,
            state,
            pending: None,
            last_fact,
            run_log_memory_only,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn records(&self) -> &FactRecordSet {
        &self.records
    }

    /// The active run, or the last finished one while `Completed`.
    #[must_use]
    pub fn run(&self) -> Option<&TrainingRun> {
        self.run.as_ref()
    }

    #[must_use]
    pub fn score(&self) -> i64 {
        self.run.as_ref().map_or(0, TrainingRun::score)
    }

    #[must_use]
    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// The fact awaiting a response, if any.
    #[must_use]
    pub fn pending_fact(&self) -> Option<FactKey> {
        self.pending.as_ref().map(|p| p.fact)
    }

    /// The most recently answered fact, for no-repeat selection.
    #[must_use]
    pub fn last_fact(&self) -> Option<FactKey> {
        self.last_fact
    }

    /// `MemoryOnly` once fact records or the run log fell back to memory.
    #[must_use]
    pub fn durability(&self) -> Durability {
        if self.run_log_memory_only || self.store.is_memory_only() {
            Durability::MemoryOnly
        } else {
            Durability::Persisted
        }
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Begin a new run with a zero score.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` while a run is in progress.
    pub async fn start(&mut self) -> Result<RunId, SessionError> {
        self.require("start", &[SessionState::Idle, SessionState::Completed])?;

        let run = TrainingRun::start(RunId::generate(), self.clock.now());
        let id = run.id();
        self.run = Some(run);
        self.state = SessionState::InProgress;
        self.last_fact = None;
        let durability = self.persist_active_run().await;
        info!(run_id = %id, ?durability, "started training run");
        Ok(id)
    }

    /// Show `fact` and arm its response alarm.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if no run is in progress, the fact is unknown,
    /// or another fact is still awaiting a response.
    pub fn present(&mut self, fact: FactKey) -> Result<Expiry, SessionError> {
        self.require("present a fact", &[SessionState::InProgress])?;
        if !self.store.catalog().contains(fact) {
            return Err(SessionError::UnknownFact(fact));
        }
        if let Some(pending) = &self.pending {
            return Err(SessionError::ResponsePending(pending.fact));
        }

        let (alarm, expiry) = ResponseAlarm::arm(self.settings.response_window);
        self.pending = Some(PendingResponse { fact, alarm });
        debug!(%fact, "presented fact");
        Ok(expiry)
    }

    /// Answer the presented fact. The alarm is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ResponseExpired` if the alarm already fired;
    /// call [`Self::expire`] instead.
    pub async fn submit(
        &mut self,
        is_correct: bool,
        response_time_ms: u64,
    ) -> Result<ResponseReceipt, SessionError> {
        self.require("submit a response", &[SessionState::InProgress])?;
        let pending = self.pending.as_ref().ok_or(SessionError::NoPendingResponse)?;
        if !pending.alarm.cancel() {
            return Err(SessionError::ResponseExpired(pending.fact));
        }
        let fact = pending.fact;
        self.pending = None;
        self.apply(fact, ResponseOutcome::from_correct(is_correct), response_time_ms)
            .await
    }

    /// Record the presented fact as timed out after its alarm fired.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlarmNotFired` while the alarm is still armed
    /// or was cancelled.
    pub async fn expire(&mut self) -> Result<ResponseReceipt, SessionError> {
        self.require("expire a response", &[SessionState::InProgress])?;
        let pending = self.pending.as_ref().ok_or(SessionError::NoPendingResponse)?;
        if pending.alarm.state() != AlarmState::Fired {
            return Err(SessionError::AlarmNotFired(pending.fact));
        }
        let fact = pending.fact;
        self.pending = None;
        self.apply(fact, ResponseOutcome::TimedOut, self.window_ms())
            .await
    }

    /// Record a response for `fact` without going through [`Self::present`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if no run is in progress, the fact is unknown,
    /// or a different fact is awaiting a response.
    pub async fn record_response(
        &mut self,
        fact: FactKey,
        is_correct: bool,
        response_time_ms: u64,
    ) -> Result<ResponseReceipt, SessionError> {
        self.require("record a response", &[SessionState::InProgress])?;
        match self.pending_fact() {
            Some(pending) if pending == fact => self.submit(is_correct, response_time_ms).await,
            Some(pending) => Err(SessionError::ResponsePending(pending)),
            None => {
                self.apply(fact, ResponseOutcome::from_correct(is_correct), response_time_ms)
                    .await
            }
        }
    }

    /// Record `fact` as timed out, for callers that run their own timer.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::record_response`].
    pub async fn record_timeout(&mut self, fact: FactKey) -> Result<ResponseReceipt, SessionError> {
        self.require("record a timeout", &[SessionState::InProgress])?;
        match self.pending.take() {
            Some(pending) if pending.fact == fact => {
                pending.alarm.cancel();
            }
            Some(pending) => {
                let other = pending.fact;
                self.pending = Some(pending);
                return Err(SessionError::ResponsePending(other));
            }
            None => {}
        }
        self.apply(fact, ResponseOutcome::TimedOut, self.window_ms())
            .await
    }

    /// Close the active run and push it into history.
    ///
    /// A fact still awaiting a response is discarded.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless a run is in progress.
    pub async fn finish(&mut self) -> Result<FinishedRun, SessionError> {
        self.require("finish", &[SessionState::InProgress])?;
        let Some(active) = self.run.as_ref() else {
            return Err(SessionError::InvalidState {
                operation: "finish",
                state: self.state,
            });
        };

        let mut finished = active.clone();
        finished.complete(self.clock.now())?;
        let durability = self.archive(&finished).await;

        if let Some(pending) = self.pending.take() {
            pending.alarm.cancel();
        }
        let summary = finished.summary();
        info!(
            run_id = %finished.id(),
            score = finished.score(),
            facts = summary.fact_count,
            correct = summary.correct_count,
            ?durability,
            "finished training run"
        );

        let sync = self.sync.spawn_sync_run(finished.clone());
        self.run = Some(finished.clone());
        self.state = SessionState::Completed;
        Ok(FinishedRun {
            run: finished,
            summary,
            durability,
            sync,
        })
    }

    fn window_ms(&self) -> u64 {
        u64::try_from(self.settings.response_window.as_millis()).unwrap_or(u64::MAX)
    }

    /// Write the active run to the run log unless it already failed once.
    async fn persist_active_run(&mut self) -> Durability {
        if self.run_log_memory_only {
            return Durability::MemoryOnly;
        }
        let Some(run) = self.run.as_ref() else {
            return Durability::Persisted;
        };
        match self.runs.save_active_run(run).await {
            Ok(()) => Durability::Persisted,
            Err(error) => {
                warn!(
                    %error,
                    run_id = %run.id(),
                    "could not record training run; continuing in memory"
                );
                self.run_log_memory_only = true;
                Durability::MemoryOnly
            }
        }
    }

    async fn archive(&mut self, finished: &TrainingRun) -> Durability {
        if self.run_log_memory_only {
            return Durability::MemoryOnly;
        }
        match self.runs.archive_run(finished, self.settings.history_limit).await {
            Ok(()) => Durability::Persisted,
            Err(error) => {
                warn!(
                    %error,
                    run_id = %finished.id(),
                    "could not archive training run; continuing in memory"
                );
                self.run_log_memory_only = true;
                Durability::MemoryOnly
            }
        }
    }

    /// Mastery update, run bookkeeping and persistence for one response.
    ///
    /// The run is appended to first; once that succeeds nothing below can
    /// fail, so an error leaves both the run and the records untouched.
    async fn apply(
        &mut self,
        fact: FactKey,
        outcome: ResponseOutcome,
        response_time_ms: u64,
    ) -> Result<ResponseReceipt, SessionError> {
        if !self.store.catalog().contains(fact) {
            return Err(SessionError::UnknownFact(fact));
        }
        let Some(run) = self.run.as_mut() else {
            return Err(SessionError::InvalidState {
                operation: "record a response",
                state: self.state,
            });
        };

        let now = self.clock.now();
        let mut record = self
            .records
            .get(fact)
            .cloned()
            .unwrap_or_else(|| FactRecord::new(fact, now));

        let response = FactResponse {
            fact,
            snapshot: record.snapshot(),
            outcome,
            response_time_ms,
            answered_at: now,
        };
        let delta = if outcome.is_correct() {
            CORRECT_SCORE
        } else {
            INCORRECT_SCORE
        };
        let before = run.score();
        run.push_response(response.clone(), delta)?;
        let score = run.score();

        record.apply_response(outcome, response_time_ms, now);
        self.records.insert(record.clone());
        let reached_target = before < self.settings.target_score && score >= self.settings.target_score;
        self.last_fact = Some(fact);

        debug!(%fact, ?outcome, score, leitner_box = record.leitner_box.value(), "recorded response");

        let report = self.store.save(&self.records).await;
        let run_log = self.persist_active_run().await;
        let durability = if run_log == Durability::MemoryOnly {
            run_log
        } else {
            report.durability
        };

        Ok(ResponseReceipt {
            response,
            record,
            score,
            reached_target,
            durability,
            sync: report.sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use facts_core::Catalog;
    use facts_core::time::{fixed_clock, fixed_now};
    use std::sync::atomic::{AtomicBool, Ordering};
    use storage::repository::{InMemoryRepository, StorageError};

    /// Run log that can refuse reads, and refuses writes while `broken`.
    #[derive(Default)]
    struct FlakyRunLog {
        inner: InMemoryRepository,
        broken: AtomicBool,
        fail_loads: bool,
    }

    impl FlakyRunLog {
        fn check(&self) -> Result<(), StorageError> {
            if self.broken.load(Ordering::SeqCst) {
                Err(StorageError::Connection("database is locked".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TrainingRunRepository for FlakyRunLog {
        async fn save_active_run(&self, run: &TrainingRun) -> Result<(), StorageError> {
            self.check()?;
            self.inner.save_active_run(run).await
        }

        async fn load_active_run(&self) -> Result<Option<TrainingRun>, StorageError> {
            if self.fail_loads {
                return Err(StorageError::Connection("disk gone".into()));
            }
            self.inner.load_active_run().await
        }

        async fn archive_run(&self, run: &TrainingRun, keep: u32) -> Result<(), StorageError> {
            self.check()?;
            self.inner.archive_run(run, keep).await
        }

        async fn list_completed_runs(&self, limit: u32) -> Result<Vec<TrainingRun>, StorageError> {
            self.inner.list_completed_runs(limit).await
        }
    }

    async fn tracker_over(runs: &Arc<FlakyRunLog>) -> SessionTracker {
        let store = ProgressStore::new(
            Catalog::standard(),
            fixed_clock(),
            Arc::new(InMemoryRepository::new()),
            SyncReconciler::local_only(),
        );
        SessionTracker::open(fixed_clock(), TrackerSettings::default(), store, runs.clone()).await
    }

    async fn tracker_with(settings: TrackerSettings) -> (SessionTracker, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        let store = ProgressStore::new(
            Catalog::standard(),
            fixed_clock(),
            Arc::new(repo.clone()),
            SyncReconciler::local_only(),
        );
        let tracker =
            SessionTracker::open(fixed_clock(), settings, store, Arc::new(repo.clone())).await;
        (tracker, repo)
    }

    async fn tracker() -> SessionTracker {
        tracker_with(TrackerSettings::default()).await.0
    }

    #[tokio::test]
    async fn rejects_calls_in_wrong_state() {
        let mut tracker = tracker().await;
        assert_eq!(tracker.state(), SessionState::Idle);

        let err = tracker
            .record_response(FactKey::new(2, 2), true, 1_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::Idle,
                ..
            }
        ));
        assert!(matches!(tracker.finish().await, Err(SessionError::InvalidState { .. })));

        tracker.start().await.unwrap();
        assert!(matches!(
            tracker.start().await,
            Err(SessionError::InvalidState {
                state: SessionState::InProgress,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn scores_and_updates_records() {
        let mut tracker = tracker().await;
        tracker.start().await.unwrap();

        let receipt = tracker
            .record_response(FactKey::new(6, 7), true, 2_000)
            .await
            .unwrap();
        assert_eq!(receipt.score, 10);
        assert_eq!(receipt.record.correct_count, 1);
        assert_eq!(receipt.response.snapshot.attempts, 0);
        assert_eq!(receipt.durability, Durability::Persisted);

        let receipt = tracker
            .record_response(FactKey::new(6, 7), false, 3_000)
            .await
            .unwrap();
        assert_eq!(receipt.score, 5);
        assert_eq!(tracker.records().get(FactKey::new(6, 7)).unwrap().attempts, 2);
        assert_eq!(tracker.last_fact(), Some(FactKey::new(6, 7)));
    }

    #[tokio::test]
    async fn rejects_facts_outside_catalog() {
        let mut tracker = tracker().await;
        tracker.start().await.unwrap();
        assert!(matches!(
            tracker.record_response(FactKey::new(11, 2), true, 1_000).await,
            Err(SessionError::UnknownFact(_))
        ));
        assert!(matches!(
            tracker.present(FactKey::new(0, 2)),
            Err(SessionError::UnknownFact(_))
        ));
        assert_eq!(tracker.score(), 0);
    }

    #[tokio::test]
    async fn reports_target_once() {
        let settings = TrackerSettings {
            target_score: 20,
            ..TrackerSettings::default()
        };
        let (mut tracker, _) = tracker_with(settings).await;
        tracker.start().await.unwrap();

        let fact = FactKey::new(4, 4);
        assert!(!tracker.record_response(fact, true, 900).await.unwrap().reached_target);
        assert!(tracker.record_response(fact, true, 900).await.unwrap().reached_target);
        assert!(!tracker.record_response(fact, true, 900).await.unwrap().reached_target);
        assert_eq!(tracker.state(), SessionState::InProgress);
    }

    #[tokio::test]
    async fn finish_archives_and_allows_restart() {
        let (mut tracker, repo) = tracker_with(TrackerSettings::default()).await;
        let first = tracker.start().await.unwrap();
        tracker
            .record_response(FactKey::new(2, 9), true, 1_500)
            .await
            .unwrap();

        let finished = tracker.finish().await.unwrap();
        assert_eq!(finished.run.id(), first);
        assert_eq!(finished.summary.correct_count, 1);
        assert!(finished.sync.is_none());
        assert_eq!(finished.durability, Durability::Persisted);
        assert_eq!(tracker.state(), SessionState::Completed);
        assert!(repo.load_active_run().await.unwrap().is_none());
        assert_eq!(repo.list_completed_runs(10).await.unwrap().len(), 1);

        let second = tracker.start().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(tracker.score(), 0);
    }

    #[tokio::test]
    async fn open_resumes_active_run() {
        let repo = InMemoryRepository::new();
        let store = || {
            ProgressStore::new(
                Catalog::standard(),
                fixed_clock(),
                Arc::new(repo.clone()),
                SyncReconciler::local_only(),
            )
        };
        let settings = TrackerSettings::default();

        let mut tracker =
            SessionTracker::open(fixed_clock(), settings, store(), Arc::new(repo.clone())).await;
        let id = tracker.start().await.unwrap();
        tracker
            .record_response(FactKey::new(5, 6), false, 4_000)
            .await
            .unwrap();
        drop(tracker);

        let resumed =
            SessionTracker::open(fixed_clock(), settings, store(), Arc::new(repo.clone())).await;
        assert_eq!(resumed.state(), SessionState::InProgress);
        assert_eq!(resumed.run().unwrap().id(), id);
        assert_eq!(resumed.score(), -5);
        assert_eq!(resumed.last_fact(), Some(FactKey::new(5, 6)));
        assert_eq!(resumed.records().get(FactKey::new(5, 6)).unwrap().wrong_count, 1);
    }

    #[tokio::test]
    async fn run_log_failure_mid_run_applies_response_once() {
        let runs = Arc::new(FlakyRunLog::default());
        let mut tracker = tracker_over(&runs).await;
        tracker.start().await.unwrap();

        let fact = FactKey::new(3, 4);
        let receipt = tracker.record_response(fact, true, 1_000).await.unwrap();
        assert_eq!(receipt.durability, Durability::Persisted);

        runs.broken.store(true, Ordering::SeqCst);
        let receipt = tracker.record_response(fact, true, 1_000).await.unwrap();
        assert_eq!(receipt.durability, Durability::MemoryOnly);
        assert_eq!(receipt.score, 20);
        assert_eq!(receipt.record.attempts, 2);
        assert_eq!(tracker.run().unwrap().responses().len(), 2);
        assert_eq!(tracker.records().get(fact).unwrap().correct_count, 2);

        // Storage keeps the run as of its last successful write.
        let stored = runs.inner.load_active_run().await.unwrap().unwrap();
        assert_eq!(stored.responses().len(), 1);

        // Once memory-only, the run log is left alone even if it recovers.
        runs.broken.store(false, Ordering::SeqCst);
        let receipt = tracker
            .record_response(FactKey::new(5, 5), false, 2_000)
            .await
            .unwrap();
        assert_eq!(receipt.durability, Durability::MemoryOnly);
        assert_eq!(tracker.durability(), Durability::MemoryOnly);
        assert_eq!(tracker.score(), 15);
        assert_eq!(
            runs.inner.load_active_run().await.unwrap().unwrap().responses().len(),
            1
        );
    }

    #[tokio::test]
    async fn archive_failure_still_completes_run() {
        let runs = Arc::new(FlakyRunLog::default());
        let mut tracker = tracker_over(&runs).await;
        let first = tracker.start().await.unwrap();
        tracker
            .record_response(FactKey::new(6, 2), true, 1_300)
            .await
            .unwrap();

        runs.broken.store(true, Ordering::SeqCst);
        let finished = tracker.finish().await.unwrap();
        assert_eq!(finished.durability, Durability::MemoryOnly);
        assert_eq!(finished.run.responses().len(), 1);
        assert_eq!(finished.summary.correct_count, 1);
        assert_eq!(tracker.state(), SessionState::Completed);
        assert!(runs.inner.list_completed_runs(10).await.unwrap().is_empty());

        let second = tracker.start().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(tracker.score(), 0);
    }

    #[tokio::test]
    async fn unreadable_run_log_opens_idle_in_memory() {
        let runs = Arc::new(FlakyRunLog {
            fail_loads: true,
            ..FlakyRunLog::default()
        });
        let mut tracker = tracker_over(&runs).await;
        assert_eq!(tracker.state(), SessionState::Idle);
        assert_eq!(tracker.durability(), Durability::MemoryOnly);

        tracker.start().await.unwrap();
        let receipt = tracker
            .record_response(FactKey::new(9, 4), true, 1_700)
            .await
            .unwrap();
        assert_eq!(receipt.durability, Durability::MemoryOnly);
        assert_eq!(receipt.score, 10);
        // Nothing is written over a run log that could not be read.
        assert!(runs.inner.load_active_run().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_cancels_alarm_before_applying() {
        let mut tracker = tracker().await;
        tracker.start().await.unwrap();

        let fact = FactKey::new(8, 7);
        let expiry = tracker.present(fact).unwrap();
        assert!(matches!(
            tracker.present(FactKey::new(1, 1)),
            Err(SessionError::ResponsePending(f)) if f == fact
        ));

        let receipt = tracker.submit(true, 3_000).await.unwrap();
        assert!(receipt.response.is_correct());
        assert!(!expiry.wait().await, "cancelled alarm must not fire");
        assert!(matches!(tracker.expire().await, Err(SessionError::NoPendingResponse)));
        assert_eq!(tracker.run().unwrap().responses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fired_alarm_records_timeout_and_run_continues() {
        let mut tracker = tracker().await;
        tracker.start().await.unwrap();

        let fact = FactKey::new(9, 6);
        let expiry = tracker.present(fact).unwrap();
        assert!(matches!(tracker.expire().await, Err(SessionError::AlarmNotFired(_))));
        assert!(expiry.wait().await);

        assert!(matches!(
            tracker.submit(true, 31_000).await,
            Err(SessionError::ResponseExpired(f)) if f == fact
        ));
        let receipt = tracker.expire().await.unwrap();
        assert!(receipt.response.timed_out());
        assert_eq!(receipt.response.response_time_ms, 30_000);
        assert_eq!(receipt.score, INCORRECT_SCORE);
        assert_eq!(receipt.record.wrong_count, 1);

        // The run keeps going after a timeout.
        assert_eq!(tracker.state(), SessionState::InProgress);
        tracker.present(FactKey::new(2, 2)).unwrap();
        tracker.submit(false, 1_000).await.unwrap();
        assert_eq!(tracker.run().unwrap().summary().timed_out_count, 1);
        assert_eq!(fixed_now(), tracker.run().unwrap().started_at());
    }
}
