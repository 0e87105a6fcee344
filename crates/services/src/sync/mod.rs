//! Best-effort mirroring of local progress to a remote store.

mod memory;
mod reconciler;
pub mod remote;
mod rest;

pub use memory::InMemoryRemoteStore;
pub use reconciler::{DEFAULT_BATCH_SIZE, SyncReconciler, SyncStatus};
pub use remote::{
    EqFilter, FactRow, RemoteStore, RemoteTable, SessionFactRow, SessionRow, UpsertTable,
    UserFactRow, insert_rows, query_rows, upsert_rows,
};
pub use rest::RestRemoteStore;
