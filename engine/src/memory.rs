//! In-process [`Connection`] implementation.
//!
//! `MemoryDatabase` keeps tables as ordered maps keyed by primary key and
//! implements transactions by snapshotting the whole state on begin. It
//! models the parts of a real database the engine depends on:
//!
//! - auto-commit when no transaction is open
//! - activity marker tables
//! - trigger based change capture that can be told to skip replication
//!   activity (writes made while a marker row is present)
//! - one-shot failure injection for exercising error paths

use crate::connection::{Connection, ConnectionResult};
use crate::error::{ConnectionError, MutationKind};
use crate::row::{extract_key, format_key};
use crate::Row;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A change recorded by the capture triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedChange {
    pub table: String,
    pub kind: MutationKind,
    /// Primary key of the changed row
    pub key: Row,
}

/// Statement class to fail on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    Commit,
    Rollback,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for FailPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailPoint::Begin => "begin",
            FailPoint::Commit => "commit",
            FailPoint::Rollback => "rollback",
            FailPoint::Insert => "insert",
            FailPoint::Update => "update",
            FailPoint::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    key_columns: Vec<String>,
    rows: BTreeMap<String, Row>,
}

impl Table {
    fn key_of(&self, table: &str, row: &Row) -> ConnectionResult<Row> {
        match extract_key(row, &self.key_columns) {
            Some(key) => Ok(key),
            None => {
                let column = self
                    .key_columns
                    .iter()
                    .find(|column| !row.contains_key(*column))
                    .cloned()
                    .unwrap_or_default();
                Err(ConnectionError::MissingKey {
                    table: table.to_string(),
                    column,
                })
            }
        }
    }
}

/// Everything a transaction can roll back.
#[derive(Debug, Clone, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    markers: BTreeMap<String, usize>,
    captured: Vec<CapturedChange>,
}

impl State {
    fn marker_present(&self) -> bool {
        self.markers.values().any(|count| *count > 0)
    }
}

/// An in-memory database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: State,
    /// State as of `begin`, present while a transaction is open
    snapshot: Option<State>,
    /// Tables whose capture triggers skip replication activity
    excluded: BTreeSet<String>,
    exclusion_calls: usize,
    commits: usize,
    rollbacks: usize,
    fail_next: Option<FailPoint>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty table with the given primary key columns.
    pub fn with_table(mut self, name: &str, key_columns: &[&str]) -> Self {
        self.state.tables.insert(
            name.to_string(),
            Table {
                key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
                rows: BTreeMap::new(),
            },
        );
        self
    }

    /// Add an activity marker table.
    pub fn with_marker_table(mut self, name: &str) -> Self {
        self.state.markers.insert(name.to_string(), 0);
        self
    }

    /// Load a row outside of any transaction and without capturing it.
    pub fn with_row(mut self, table: &str, row: Row) -> Self {
        if let Some(t) = self.state.tables.get_mut(table) {
            if let Ok(key) = t.key_of(table, &row) {
                t.rows.insert(format_key(&key), row);
            }
        }
        self
    }

    /// Make the next statement of the given class fail once.
    pub fn inject_failure(&mut self, point: FailPoint) {
        self.fail_next = Some(point);
    }

    /// Rows as seen from inside the current transaction, in key order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        Self::rows_of(&self.state, table)
    }

    /// Rows visible to other connections: the last committed state.
    pub fn committed_rows(&self, table: &str) -> Vec<Row> {
        Self::rows_of(self.snapshot.as_ref().unwrap_or(&self.state), table)
    }

    fn rows_of(state: &State, table: &str) -> Vec<Row> {
        state
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up a row by its key columns.
    pub fn get(&self, table: &str, key: &Row) -> Option<&Row> {
        let t = self.state.tables.get(table)?;
        let key = t.key_of(table, key).ok()?;
        t.rows.get(&format_key(&key))
    }

    /// Number of rows currently in the marker table.
    pub fn marker_count(&self, marker_table: &str) -> usize {
        self.state.markers.get(marker_table).copied().unwrap_or(0)
    }

    /// Changes recorded by the capture triggers, oldest first.
    pub fn captured_changes(&self) -> &[CapturedChange] {
        &self.state.captured
    }

    pub fn is_excluding_replication_activity(&self, table: &str) -> bool {
        self.excluded.contains(table)
    }

    /// How often capture exclusion was requested.
    pub fn exclusion_calls(&self) -> usize {
        self.exclusion_calls
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks
    }

    fn check_failure(&mut self, point: FailPoint) -> ConnectionResult<()> {
        if self.fail_next == Some(point) {
            self.fail_next = None;
            return Err(ConnectionError::Backend(format!("injected {} failure", point)));
        }
        Ok(())
    }

    fn table_mut(&mut self, table: &str) -> ConnectionResult<&mut Table> {
        self.state
            .tables
            .get_mut(table)
            .ok_or_else(|| ConnectionError::TableNotFound(table.to_string()))
    }

    fn capture(&mut self, table: &str, kind: MutationKind, key: Row) {
        if self.excluded.contains(table) && self.state.marker_present() {
            return;
        }
        self.state.captured.push(CapturedChange {
            table: table.to_string(),
            kind,
            key,
        });
    }
}

impl Connection for MemoryDatabase {
    fn begin_transaction(&mut self) -> ConnectionResult<()> {
        self.check_failure(FailPoint::Begin)?;
        if self.snapshot.is_some() {
            return Err(ConnectionError::TransactionActive);
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit_transaction(&mut self) -> ConnectionResult<()> {
        self.check_failure(FailPoint::Commit)?;
        if self.snapshot.take().is_none() {
            return Err(ConnectionError::NoTransaction);
        }
        self.commits += 1;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> ConnectionResult<()> {
        self.check_failure(FailPoint::Rollback)?;
        let snapshot = self.snapshot.take().ok_or(ConnectionError::NoTransaction)?;
        self.state = snapshot;
        self.rollbacks += 1;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn table_exists(&self, table: &str) -> ConnectionResult<bool> {
        Ok(self.state.tables.contains_key(table) || self.state.markers.contains_key(table))
    }

    fn insert_record(&mut self, table: &str, values: &Row) -> ConnectionResult<()> {
        self.check_failure(FailPoint::Insert)?;
        let t = self.table_mut(table)?;
        let key = t.key_of(table, values)?;
        let id = format_key(&key);
        if t.rows.contains_key(&id) {
            return Err(ConnectionError::DuplicateKey {
                table: table.to_string(),
                key: id,
            });
        }
        t.rows.insert(id, values.clone());
        self.capture(table, MutationKind::Insert, key);
        Ok(())
    }

    fn update_record(
        &mut self,
        table: &str,
        values: &Row,
        old_key: Option<&Row>,
    ) -> ConnectionResult<()> {
        self.check_failure(FailPoint::Update)?;
        let t = self.table_mut(table)?;
        let old_key = t.key_of(table, old_key.unwrap_or(values))?;
        let old_id = format_key(&old_key);

        let original = t
            .rows
            .remove(&old_id)
            .ok_or_else(|| ConnectionError::RowNotFound {
                table: table.to_string(),
                key: old_id.clone(),
            })?;
        let mut row = original.clone();
        row.extend(values.iter().map(|(c, v)| (c.clone(), v.clone())));

        let new_key = t.key_of(table, &row)?;
        let new_id = format_key(&new_key);
        if new_id != old_id && t.rows.contains_key(&new_id) {
            t.rows.insert(old_id, original);
            return Err(ConnectionError::DuplicateKey {
                table: table.to_string(),
                key: new_id,
            });
        }
        t.rows.insert(new_id, row);
        self.capture(table, MutationKind::Update, new_key);
        Ok(())
    }

    fn delete_record(&mut self, table: &str, key: &Row) -> ConnectionResult<()> {
        self.check_failure(FailPoint::Delete)?;
        let t = self.table_mut(table)?;
        let key = t.key_of(table, key)?;
        let id = format_key(&key);
        if t.rows.remove(&id).is_none() {
            return Err(ConnectionError::RowNotFound {
                table: table.to_string(),
                key: id,
            });
        }
        self.capture(table, MutationKind::Delete, key);
        Ok(())
    }

    fn insert_activity_marker(&mut self, marker_table: &str) -> ConnectionResult<()> {
        let count = self
            .state
            .markers
            .get_mut(marker_table)
            .ok_or_else(|| ConnectionError::TableNotFound(marker_table.to_string()))?;
        *count += 1;
        Ok(())
    }

    fn clear_activity_markers(&mut self, marker_table: &str) -> ConnectionResult<()> {
        let count = self
            .state
            .markers
            .get_mut(marker_table)
            .ok_or_else(|| ConnectionError::TableNotFound(marker_table.to_string()))?;
        *count = 0;
        Ok(())
    }

    fn exclude_replication_activity(&mut self, table: &str) -> ConnectionResult<()> {
        if !self.state.tables.contains_key(table) {
            return Err(ConnectionError::TableNotFound(table.to_string()));
        }
        self.exclusion_calls += 1;
        self.excluded.insert(table.to_string());
        Ok(())
    }
}
