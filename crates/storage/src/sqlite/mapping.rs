use chrono::{DateTime, Utc};
use facts_core::model::{
    FactKey, FactRecord, FactResponse, LeitnerBox, MasterySnapshot, ResponseOutcome, RunId,
    RunStatus, TrainingRun,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} out of range: {v}")))
}

fn u8_from_i64(field: &'static str, v: i64) -> Result<u8, StorageError> {
    u8::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} out of range: {v}")))
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn outcome_as_str(outcome: ResponseOutcome) -> &'static str {
    match outcome {
        ResponseOutcome::Correct => "correct",
        ResponseOutcome::Wrong => "wrong",
        ResponseOutcome::TimedOut => "timed_out",
    }
}

pub(crate) fn parse_outcome(s: &str) -> Result<ResponseOutcome, StorageError> {
    match s {
        "correct" => Ok(ResponseOutcome::Correct),
        "wrong" => Ok(ResponseOutcome::Wrong),
        "timed_out" => Ok(ResponseOutcome::TimedOut),
        _ => Err(StorageError::Serialization(format!("invalid outcome: {s}"))),
    }
}

fn fact_key(row: &SqliteRow) -> Result<FactKey, StorageError> {
    let multiplicand = u8_from_i64("multiplicand", row.try_get("multiplicand").map_err(ser)?)?;
    let multiplier = u8_from_i64("multiplier", row.try_get("multiplier").map_err(ser)?)?;
    Ok(FactKey::new(multiplicand, multiplier))
}

pub(crate) fn map_fact_record_row(row: &SqliteRow) -> Result<FactRecord, StorageError> {
    FactRecord::from_persisted(
        fact_key(row)?,
        u32_from_i64("attempts", row.try_get("attempts").map_err(ser)?)?,
        u32_from_i64("correct_count", row.try_get("correct_count").map_err(ser)?)?,
        u32_from_i64("wrong_count", row.try_get("wrong_count").map_err(ser)?)?,
        u32_from_i64("streak", row.try_get("streak").map_err(ser)?)?,
        row.try_get("avg_time_secs").map_err(ser)?,
        u8_from_i64("leitner_box", row.try_get("leitner_box").map_err(ser)?)?,
        row.try_get("difficulty_rating").map_err(ser)?,
        row.try_get("last_practiced").map_err(ser)?,
        row.try_get("next_practice_due").map_err(ser)?,
    )
    .map_err(ser)
}

/// Maps a `fact_responses` row; snapshot columns carry the `snap_` prefix.
pub(crate) fn map_response_row(row: &SqliteRow) -> Result<FactResponse, StorageError> {
    let leitner_box = LeitnerBox::new(u8_from_i64(
        "snap_leitner_box",
        row.try_get("snap_leitner_box").map_err(ser)?,
    )?)
    .map_err(ser)?;

    let snapshot = MasterySnapshot {
        attempts: u32_from_i64("snap_attempts", row.try_get("snap_attempts").map_err(ser)?)?,
        correct_count: u32_from_i64(
            "snap_correct_count",
            row.try_get("snap_correct_count").map_err(ser)?,
        )?,
        wrong_count: u32_from_i64(
            "snap_wrong_count",
            row.try_get("snap_wrong_count").map_err(ser)?,
        )?,
        streak: u32_from_i64("snap_streak", row.try_get("snap_streak").map_err(ser)?)?,
        avg_time_secs: row.try_get("snap_avg_time_secs").map_err(ser)?,
        leitner_box,
        difficulty_rating: row.try_get("snap_difficulty_rating").map_err(ser)?,
        last_practiced: row.try_get("snap_last_practiced").map_err(ser)?,
        next_practice_due: row.try_get("snap_next_practice_due").map_err(ser)?,
    };

    let response_time_ms: i64 = row.try_get("response_time_ms").map_err(ser)?;
    Ok(FactResponse {
        fact: fact_key(row)?,
        snapshot,
        outcome: parse_outcome(&row.try_get::<String, _>("outcome").map_err(ser)?)?,
        response_time_ms: u64::try_from(response_time_ms)
            .map_err(|_| StorageError::Serialization("response_time_ms sign overflow".into()))?,
        answered_at: row.try_get("answered_at").map_err(ser)?,
    })
}

/// Maps a `training_runs` row together with its already-mapped responses.
pub(crate) fn map_run_row(
    row: &SqliteRow,
    responses: Vec<FactResponse>,
) -> Result<TrainingRun, StorageError> {
    let id: RunId = row.try_get::<String, _>("id").map_err(ser)?.parse().map_err(ser)?;
    let started_at: DateTime<Utc> = row.try_get("started_at").map_err(ser)?;
    let finished_at: Option<DateTime<Utc>> = row.try_get("finished_at").map_err(ser)?;
    let status = RunStatus::parse(&row.try_get::<String, _>("status").map_err(ser)?).map_err(ser)?;

    TrainingRun::from_persisted(
        id,
        started_at,
        finished_at,
        responses,
        row.try_get("score").map_err(ser)?,
        status,
    )
    .map_err(ser)
}
