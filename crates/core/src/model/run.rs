use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::fact::{MasterySnapshot, ResponseOutcome};
use crate::model::ids::{FactKey, RunId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunError {
    #[error("run is already completed")]
    AlreadyCompleted,

    #[error("finished_at is before started_at")]
    InvalidTimeRange,

    #[error("unknown run status: {0}")]
    UnknownStatus(String),
}

/// Lifecycle of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
        }
    }

    /// # Errors
    ///
    /// Returns `RunError::UnknownStatus` for anything other than the two
    /// persisted spellings.
    pub fn parse(raw: &str) -> Result<Self, RunError> {
        match raw {
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            other => Err(RunError::UnknownStatus(other.to_owned())),
        }
    }
}

/// One answered (or timed-out) presentation of a fact.
///
/// `snapshot` holds the fact's mastery *before* this response was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactResponse {
    pub fact: FactKey,
    pub snapshot: MasterySnapshot,
    pub outcome: ResponseOutcome,
    pub response_time_ms: u64,
    pub answered_at: DateTime<Utc>,
}

impl FactResponse {
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.outcome.is_correct()
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.outcome.timed_out()
    }
}

/// Aggregate counts for a run, as reported to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub fact_count: u32,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub timed_out_count: u32,
    pub duration_seconds: Option<i64>,
}

/// A practice run: the responses given between `start` and `finish`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRun {
    id: RunId,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    responses: Vec<FactResponse>,
    score: i64,
    status: RunStatus,
}

impl TrainingRun {
    #[must_use]
    pub fn start(id: RunId, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            finished_at: None,
            responses: Vec::new(),
            score: 0,
            status: RunStatus::InProgress,
        }
    }

    /// Rehydrate a run from storage.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidTimeRange` if the run finished before it started.
    pub fn from_persisted(
        id: RunId,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        responses: Vec<FactResponse>,
        score: i64,
        status: RunStatus,
    ) -> Result<Self, RunError> {
        if finished_at.is_some_and(|f| f < started_at) {
            return Err(RunError::InvalidTimeRange);
        }
        Ok(Self {
            id,
            started_at,
            finished_at,
            responses,
            score,
            status,
        })
    }

    #[must_use]
    pub fn id(&self) -> RunId {
        self.id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    #[must_use]
    pub fn responses(&self) -> &[FactResponse] {
        &self.responses
    }

    #[must_use]
    pub fn score(&self) -> i64 {
        self.score
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Appends a response and moves the score by `score_delta`.
    ///
    /// # Errors
    ///
    /// Returns `RunError::AlreadyCompleted` once the run is finished.
    pub fn push_response(
        &mut self,
        response: FactResponse,
        score_delta: i64,
    ) -> Result<(), RunError> {
        if self.is_completed() {
            return Err(RunError::AlreadyCompleted);
        }
        self.responses.push(response);
        self.score = self.score.saturating_add(score_delta);
        Ok(())
    }

    /// Stamps the finish time and marks the run completed.
    ///
    /// # Errors
    ///
    /// Returns `RunError::AlreadyCompleted` if called twice, or
    /// `RunError::InvalidTimeRange` if `at` precedes the start.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), RunError> {
        if self.is_completed() {
            return Err(RunError::AlreadyCompleted);
        }
        if at < self.started_at {
            return Err(RunError::InvalidTimeRange);
        }
        self.finished_at = Some(at);
        self.status = RunStatus::Completed;
        Ok(())
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut correct = 0_u32;
        let mut incorrect = 0_u32;
        let mut timed_out = 0_u32;
        for response in &self.responses {
            if response.is_correct() {
                correct = correct.saturating_add(1);
            } else {
                incorrect = incorrect.saturating_add(1);
            }
            if response.timed_out() {
                timed_out = timed_out.saturating_add(1);
            }
        }

        RunSummary {
            fact_count: correct.saturating_add(incorrect),
            correct_count: correct,
            incorrect_count: incorrect,
            timed_out_count: timed_out,
            duration_seconds: self
                .finished_at
                .map(|f| f.signed_duration_since(self.started_at).num_seconds()),
        }
    }
}
