use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use super::remote::{EqFilter, RemoteStore};
use crate::error::RemoteError;

/// Remote store kept in process memory.
///
/// Upserts replace rows whose conflict-key columns match. `set_failing(true)`
/// makes every call fail as an unavailable service.
#[derive(Clone, Default)]
pub struct InMemoryRemoteStore {
    tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    failing: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl InMemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All rows currently stored in `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .map(|tables| tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// `"{operation} {table}"` for every call received, failed ones included.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn begin(&self, operation: &str, table: &str) -> Result<(), RemoteError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{operation} {table}"));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "remote store unavailable".into(),
            });
        }
        Ok(())
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Vec<Value>) -> T,
    ) -> Result<T, RemoteError> {
        let mut tables = self.tables.lock().map_err(|e| RemoteError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: e.to_string(),
        })?;
        Ok(f(tables.entry(table.to_owned()).or_default()))
    }
}

fn same_key(a: &Value, b: &Value, columns: &[&str]) -> bool {
    columns.iter().all(|column| a.get(column) == b.get(column))
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upsert(
        &self,
        table: &str,
        conflict_key: &str,
        rows: &[Value],
    ) -> Result<(), RemoteError> {
        self.begin("upsert", table)?;
        let columns: Vec<&str> = conflict_key.split(',').map(str::trim).collect();
        self.with_table(table, |stored| {
            for row in rows {
                match stored.iter_mut().find(|existing| same_key(existing, row, &columns)) {
                    Some(existing) => *existing = row.clone(),
                    None => stored.push(row.clone()),
                }
            }
        })
    }

    async fn insert(&self, table: &str, rows: &[Value]) -> Result<(), RemoteError> {
        self.begin("insert", table)?;
        self.with_table(table, |stored| stored.extend(rows.iter().cloned()))
    }

    async fn query(
        &self,
        table: &str,
        filters: &[EqFilter<'_>],
    ) -> Result<Vec<Value>, RemoteError> {
        self.begin("query", table)?;
        self.with_table(table, |stored| {
            stored
                .iter()
                .filter(|row| {
                    filters.iter().all(|(column, value)| match row.get(*column) {
                        Some(Value::String(s)) => s == value,
                        Some(other) => other.to_string() == *value,
                        None => false,
                    })
                })
                .cloned()
                .collect()
        })
    }
}
