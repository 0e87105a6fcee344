//! Shared error types for the services crate.

use thiserror::Error;

use facts_core::model::{FactKey, RunError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

use crate::session::SessionState;

/// Errors emitted by `SessionTracker`.
///
/// Every variant is fatal to the call that produced it only; the tracker
/// stays usable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("fact {0} is not part of the catalog")]
    UnknownFact(FactKey),
    #[error("fact {0} is still awaiting a response")]
    ResponsePending(FactKey),
    #[error("no fact is awaiting a response")]
    NoPendingResponse,
    #[error("response window for {0} has already expired")]
    ResponseExpired(FactKey),
    #[error("response window for {0} has not expired")]
    AlarmNotFired(FactKey),
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Errors emitted by remote store adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("remote store rejected credentials with status {0}")]
    Unauthorized(reqwest::StatusCode),
    #[error("remote store returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("remote row could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors emitted while reading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} is not a valid URL: {value:?}")]
    InvalidUrl { name: &'static str, value: String },
    #[error("{name} is not a valid UUID: {value:?}")]
    InvalidUuid { name: &'static str, value: String },
}

/// Errors emitted while bootstrapping practice services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PracticeServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
