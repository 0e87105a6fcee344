use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use facts_core::model::{FactKey, FactRecord, FactResponse, TrainingRun};

use crate::error::RemoteError;

/// Equality filter on one column, as used by [`RemoteStore::query`].
pub type EqFilter<'a> = (&'a str, String);

/// An authenticated, table-oriented remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert-or-update `rows`, matching existing rows on `conflict_key`
    /// (a comma separated column list).
    async fn upsert(
        &self,
        table: &str,
        conflict_key: &str,
        rows: &[Value],
    ) -> Result<(), RemoteError>;

    /// Append `rows`.
    async fn insert(&self, table: &str, rows: &[Value]) -> Result<(), RemoteError>;

    /// Rows whose columns equal every filter value.
    async fn query(
        &self,
        table: &str,
        filters: &[EqFilter<'_>],
    ) -> Result<Vec<Value>, RemoteError>;
}

/// A row type bound to its remote table.
pub trait RemoteTable: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;
}

/// A row type that is written by upsert, with its conflict key.
pub trait UpsertTable: RemoteTable {
    const CONFLICT_KEY: &'static str;
}

fn to_values<T: Serialize>(rows: &[T]) -> Result<Vec<Value>, RemoteError> {
    rows.iter()
        .map(|row| serde_json::to_value(row).map_err(RemoteError::from))
        .collect()
}

/// Upsert typed rows into their table.
///
/// # Errors
///
/// Returns `RemoteError` if encoding or the remote call fails.
pub async fn upsert_rows<T: UpsertTable>(
    store: &dyn RemoteStore,
    rows: &[T],
) -> Result<(), RemoteError> {
    store.upsert(T::TABLE, T::CONFLICT_KEY, &to_values(rows)?).await
}

/// Insert typed rows into their table.
///
/// # Errors
///
/// Returns `RemoteError` if encoding or the remote call fails.
pub async fn insert_rows<T: RemoteTable>(
    store: &dyn RemoteStore,
    rows: &[T],
) -> Result<(), RemoteError> {
    store.insert(T::TABLE, &to_values(rows)?).await
}

/// Query typed rows from their table.
///
/// # Errors
///
/// Returns `RemoteError` if the remote call fails or a row does not decode.
pub async fn query_rows<T: RemoteTable>(
    store: &dyn RemoteStore,
    filters: &[EqFilter<'_>],
) -> Result<Vec<T>, RemoteError> {
    store
        .query(T::TABLE, filters)
        .await?
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(RemoteError::from))
        .collect()
}

//
// ─── ROWS ──────────────────────────────────────────────────────────────────────
//

/// A catalog fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRow {
    pub id: Uuid,
    pub multiplicand: i16,
    pub multiplier: i16,
}

impl RemoteTable for FactRow {
    const TABLE: &'static str = "facts";
}

impl UpsertTable for FactRow {
    const CONFLICT_KEY: &'static str = "multiplicand,multiplier";
}

impl From<FactKey> for FactRow {
    fn from(fact: FactKey) -> Self {
        Self {
            id: fact.remote_id(),
            multiplicand: i16::from(fact.multiplicand()),
            multiplier: i16::from(fact.multiplier()),
        }
    }
}

/// Per-user aggregate for one fact. Always carries the full aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFactRow {
    pub user_id: Uuid,
    pub fact_id: Uuid,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub streak: i64,
    pub leitner_box: i16,
    pub avg_time_secs: f64,
    pub difficulty_rating: f64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub next_practice_due: DateTime<Utc>,
}

impl RemoteTable for UserFactRow {
    const TABLE: &'static str = "user_facts";
}

impl UpsertTable for UserFactRow {
    const CONFLICT_KEY: &'static str = "user_id,fact_id";
}

impl UserFactRow {
    #[must_use]
    pub fn from_record(user_id: Uuid, record: &FactRecord) -> Self {
        Self {
            user_id,
            fact_id: record.fact.remote_id(),
            correct_count: i64::from(record.correct_count),
            incorrect_count: i64::from(record.wrong_count),
            streak: i64::from(record.streak),
            leitner_box: i16::from(record.leitner_box.value()),
            avg_time_secs: record.avg_time_secs,
            difficulty_rating: record.difficulty_rating,
            last_seen_at: record.last_practiced,
            next_practice_due: record.next_practice_due,
        }
    }
}

/// Immutable summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub fact_count: i64,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub duration_seconds: Option<i64>,
    pub score: i64,
}

impl RemoteTable for SessionRow {
    const TABLE: &'static str = "sessions";
}

impl SessionRow {
    #[must_use]
    pub fn from_run(user_id: Uuid, run: &TrainingRun) -> Self {
        let summary = run.summary();
        Self {
            id: run.id().as_uuid(),
            user_id,
            start_time: run.started_at(),
            end_time: run.finished_at(),
            fact_count: i64::from(summary.fact_count),
            correct_count: i64::from(summary.correct_count),
            incorrect_count: i64::from(summary.incorrect_count),
            duration_seconds: summary.duration_seconds,
            score: run.score(),
        }
    }
}

/// One raw response event of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFactRow {
    pub session_id: Uuid,
    pub fact_id: Uuid,
    pub is_correct: bool,
    pub response_time_ms: i64,
    pub timed_out: bool,
    pub created_at: DateTime<Utc>,
}

impl RemoteTable for SessionFactRow {
    const TABLE: &'static str = "session_facts";
}

impl SessionFactRow {
    #[must_use]
    pub fn from_response(session_id: Uuid, response: &FactResponse) -> Self {
        Self {
            session_id,
            fact_id: response.fact.remote_id(),
            is_correct: response.is_correct(),
            response_time_ms: i64::try_from(response.response_time_ms).unwrap_or(i64::MAX),
            timed_out: response.timed_out(),
            created_at: response.answered_at,
        }
    }
}
