//! The synchronization helper: what a syncer is allowed to do.

use crate::row::format_key;
use crate::{Committer, DiffKind, Difference, Pair, Result, Row, Side, SyncOptions};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// What happened to a difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "action", content = "side")]
pub enum SyncOutcome {
    Ignored,
    /// Row inserted into the given side
    Inserted(Side),
    /// Row deleted from the given side
    Deleted(Side),
    /// Row on the given side overwritten by the other side
    Updated(Side),
    /// Handled by a custom handler
    Custom,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Ignored => f.write_str("ignored"),
            SyncOutcome::Inserted(side) => write!(f, "inserted into {}", side),
            SyncOutcome::Deleted(side) => write!(f, "deleted from {}", side),
            SyncOutcome::Updated(side) => write!(f, "updated {}", side),
            SyncOutcome::Custom => f.write_str("custom handler"),
        }
    }
}

/// An entry of the sync event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    /// Left table name
    pub table: String,
    pub kind: DiffKind,
    /// The row the event is about, left version for conflicts
    pub row: Row,
    pub outcome: SyncOutcome,
    pub logged_at: DateTime<Utc>,
}

/// Counters for one table sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub left_only: usize,
    pub right_only: usize,
    pub conflicts: usize,
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    /// Commit windows closed by reaching the commit frequency
    pub commit_windows: usize,
    pub events: Vec<SyncEvent>,
}

impl SyncStats {
    pub fn differences(&self) -> usize {
        self.left_only + self.right_only + self.conflicts
    }

    pub fn mutations(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }

    pub(crate) fn record_difference(&mut self, kind: DiffKind) {
        match kind {
            DiffKind::LeftOnly => self.left_only += 1,
            DiffKind::RightOnly => self.right_only += 1,
            DiffKind::Conflict => self.conflicts += 1,
        }
    }
}

/// Interface through which syncers and custom handlers act on the databases.
pub trait SyncHelper {
    /// Name of the synced table on `side`.
    fn table(&self, side: Side) -> &str;

    fn options(&self) -> &SyncOptions;

    fn insert_record(&mut self, side: Side, row: &Row) -> Result<()>;

    /// Overwrite the row with the same primary key on `side`.
    fn update_record(&mut self, side: Side, row: &Row) -> Result<()>;

    /// Delete the row with the primary key of `row` from `side`.
    fn delete_record(&mut self, side: Side, row: &Row) -> Result<()>;

    /// Record the outcome of a difference in the sync event log.
    fn log_sync_outcome(&mut self, diff: &Difference, outcome: SyncOutcome);

    /// Whether the last mutation opened a new commit window.
    fn is_new_transaction_boundary(&self) -> bool {
        false
    }
}

/// Helper used by [`TableSync`](crate::TableSync): forwards to the table
/// sync's committer and keeps the stats.
pub struct TableSyncHelper {
    tables: Pair<String>,
    options: SyncOptions,
    committer: Box<dyn Committer>,
    stats: SyncStats,
}

impl TableSyncHelper {
    pub fn new(tables: Pair<String>, options: SyncOptions, committer: Box<dyn Committer>) -> Self {
        Self {
            tables,
            options,
            committer,
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub(crate) fn record_difference(&mut self, kind: DiffKind) {
        self.stats.record_difference(kind);
    }

    /// Open the committer's transactions.
    pub fn begin(&mut self) -> Result<()> {
        self.committer.begin()
    }

    /// Finalize the committer.
    pub fn finalize(&mut self, success: bool) -> Result<()> {
        self.committer.finalize(success)
    }

    pub fn into_stats(self) -> SyncStats {
        self.stats
    }

    fn mutation_done(&mut self) {
        if self.committer.is_new_transaction_boundary() {
            self.stats.commit_windows += 1;
        }
    }
}

impl SyncHelper for TableSyncHelper {
    fn table(&self, side: Side) -> &str {
        self.tables.get(side)
    }

    fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn insert_record(&mut self, side: Side, row: &Row) -> Result<()> {
        self.committer.insert_record(side, self.tables.get(side), row)?;
        self.stats.inserts += 1;
        self.mutation_done();
        Ok(())
    }

    fn update_record(&mut self, side: Side, row: &Row) -> Result<()> {
        self.committer.update_record(side, self.tables.get(side), row, None)?;
        self.stats.updates += 1;
        self.mutation_done();
        Ok(())
    }

    fn delete_record(&mut self, side: Side, row: &Row) -> Result<()> {
        self.committer.delete_record(side, self.tables.get(side), row)?;
        self.stats.deletes += 1;
        self.mutation_done();
        Ok(())
    }

    fn log_sync_outcome(&mut self, diff: &Difference, outcome: SyncOutcome) {
        let row = diff.any_row().clone();
        tracing::info!(
            table = %self.tables.left,
            kind = %diff.kind(),
            row = %format_key(&row),
            %outcome,
            "sync event"
        );
        self.stats.events.push(SyncEvent {
            table: self.tables.left.clone(),
            kind: diff.kind(),
            row,
            outcome,
            logged_at: Utc::now(),
        });
    }

    fn is_new_transaction_boundary(&self) -> bool {
        self.committer.is_new_transaction_boundary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferedCommitter, DefaultCommitter, MemoryDatabase, Session};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn row(value: serde_json::Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    fn databases() -> (Arc<Mutex<MemoryDatabase>>, Arc<Mutex<MemoryDatabase>>) {
        (
            Arc::new(Mutex::new(MemoryDatabase::new().with_table("users", &["id"]))),
            Arc::new(Mutex::new(MemoryDatabase::new().with_table("people", &["id"]))),
        )
    }

    #[test]
    fn forwards_to_side_table() {
        let (left, right) = databases();
        let session = Session::new(left.clone(), right.clone());
        let tables = Pair::new("users".to_string(), "people".to_string());
        let mut helper = TableSyncHelper::new(
            tables,
            SyncOptions::default(),
            Box::new(DefaultCommitter::new(session)),
        );

        helper
            .insert_record(Side::Right, &row(json!({"id": 1, "name": "Alice"})))
            .unwrap();
        helper
            .update_record(Side::Right, &row(json!({"id": 1, "name": "Alicia"})))
            .unwrap();
        helper.insert_record(Side::Left, &row(json!({"id": 2}))).unwrap();
        helper.delete_record(Side::Left, &row(json!({"id": 2}))).unwrap();

        assert_eq!(helper.table(Side::Right), "people");
        assert_eq!(
            right.lock().rows("people"),
            vec![row(json!({"id": 1, "name": "Alicia"}))]
        );
        assert!(left.lock().rows("users").is_empty());

        let stats = helper.into_stats();
        assert_eq!((stats.inserts, stats.updates, stats.deletes), (2, 1, 1));
        assert_eq!(stats.mutations(), 4);
        assert_eq!(stats.commit_windows, 0);
    }

    #[test]
    fn failed_mutation_not_counted() {
        let (left, right) = databases();
        let session = Session::new(left, right);
        let tables = Pair::new("users".to_string(), "people".to_string());
        let mut helper = TableSyncHelper::new(
            tables,
            SyncOptions::default(),
            Box::new(DefaultCommitter::new(session)),
        );

        assert!(helper.delete_record(Side::Left, &row(json!({"id": 9}))).is_err());
        assert_eq!(helper.stats().deletes, 0);
    }

    #[test]
    fn counts_commit_windows() {
        let (left, right) = databases();
        let session = Session::new(left, right.clone());
        let options = SyncOptions::default().with_commit_frequency(2);
        let mut committer = BufferedCommitter::new(session, &options).unwrap();
        committer.begin().unwrap();
        let tables = Pair::new("users".to_string(), "people".to_string());
        let mut helper = TableSyncHelper::new(tables, options, Box::new(committer));

        for id in 0..5 {
            helper
                .insert_record(Side::Right, &row(json!({"id": id})))
                .unwrap();
        }
        assert!(!helper.is_new_transaction_boundary());
        helper.finalize(true).unwrap();

        assert_eq!(helper.stats().commit_windows, 2);
        assert_eq!(right.lock().committed_rows("people").len(), 5);
    }

    #[test]
    fn logs_events() {
        let (left, right) = databases();
        let session = Session::new(left, right);
        let tables = Pair::new("users".to_string(), "people".to_string());
        let mut helper = TableSyncHelper::new(
            tables,
            SyncOptions::default(),
            Box::new(DefaultCommitter::new(session)),
        );

        let diff = Difference::conflict(
            row(json!({"id": 3, "v": "x"})),
            row(json!({"id": 3, "v": "y"})),
        );
        let before = Utc::now();
        helper.log_sync_outcome(&diff, SyncOutcome::Ignored);

        let events = &helper.stats().events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].table, "users");
        assert_eq!(events[0].kind, DiffKind::Conflict);
        assert_eq!(events[0].row, row(json!({"id": 3, "v": "x"})));
        assert_eq!(events[0].outcome, SyncOutcome::Ignored);
        assert!(events[0].logged_at >= before);
    }

    #[test]
    fn outcome_display() {
        assert_eq!(SyncOutcome::Inserted(Side::Right).to_string(), "inserted into right");
        assert_eq!(SyncOutcome::Updated(Side::Left).to_string(), "updated left");
        assert_eq!(SyncOutcome::Ignored.to_string(), "ignored");
    }
}
