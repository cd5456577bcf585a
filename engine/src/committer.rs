//! Committers decide when the mutations of a table sync become durable.
//!
//! Every table sync owns exactly one committer. The syncer never touches a
//! connection directly: each insert, update and delete passes through
//! [`Committer::apply`], which lets the committer group statements into
//! transactions.
//!
//! # Variants
//!
//! - [`DefaultCommitter`] - hands every statement straight to the
//!   connection, relying on its auto-commit behaviour
//! - [`BufferedCommitter`] - groups statements into commit windows of
//!   `commitFrequency` mutations and keeps the change capture triggers from
//!   recording the engine's own writes
//! - [`NeverCommitter`](crate::NeverCommitter) - test variant that never
//!   commits, see the [`harness`](crate::harness) module

use crate::error::{ConnectionError, MutationKind, TxAction};
use crate::{Error, Pair, Result, Row, Session, Side, SyncOptions};
use std::collections::HashSet;

/// A single mutating statement.
#[derive(Debug, Clone, Copy)]
pub enum Mutation<'a> {
    Insert {
        values: &'a Row,
    },
    Update {
        values: &'a Row,
        /// Key of the row before the update, if it differs from `values`
        old_key: Option<&'a Row>,
    },
    Delete {
        key: &'a Row,
    },
}

impl Mutation<'_> {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Insert { .. } => MutationKind::Insert,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Delete { .. } => MutationKind::Delete,
        }
    }

    /// Execute on `side` of the session. Connection errors become
    /// [`Error::Mutation`].
    pub fn execute(&self, session: &Session, side: Side, table: &str) -> Result<()> {
        let mut connection = session.lock(side);
        let outcome = match *self {
            Mutation::Insert { values } => connection.insert_record(table, values),
            Mutation::Update { values, old_key } => {
                connection.update_record(table, values, old_key)
            }
            Mutation::Delete { key } => connection.delete_record(table, key),
        };
        outcome.map_err(|source| Error::mutation(side, table, self.kind(), source))
    }
}

/// Transaction policy for one table sync.
pub trait Committer: Send {
    /// Open the transactions mutations will run in.
    fn begin(&mut self) -> Result<()>;

    /// Apply one mutation to `table` on `side`.
    fn apply(&mut self, side: Side, table: &str, mutation: Mutation<'_>) -> Result<()>;

    /// Whether the most recent mutation started a fresh transaction window,
    /// i.e. everything before it is durable.
    fn is_new_transaction_boundary(&self) -> bool;

    /// Commit (`success`) or roll back everything still pending.
    ///
    /// Called exactly once per table sync, on every exit path.
    fn finalize(&mut self, success: bool) -> Result<()>;

    fn insert_record(&mut self, side: Side, table: &str, values: &Row) -> Result<()> {
        self.apply(side, table, Mutation::Insert { values })
    }

    fn update_record(
        &mut self,
        side: Side,
        table: &str,
        values: &Row,
        old_key: Option<&Row>,
    ) -> Result<()> {
        self.apply(side, table, Mutation::Update { values, old_key })
    }

    fn delete_record(&mut self, side: Side, table: &str, key: &Row) -> Result<()> {
        self.apply(side, table, Mutation::Delete { key })
    }
}

/// Pass-through committer: every statement is auto-committed by the
/// connection.
pub struct DefaultCommitter {
    session: Session,
}

impl DefaultCommitter {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

impl Committer for DefaultCommitter {
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, side: Side, table: &str, mutation: Mutation<'_>) -> Result<()> {
        mutation.execute(&self.session, side, table)
    }

    fn is_new_transaction_boundary(&self) -> bool {
        false
    }

    fn finalize(&mut self, _success: bool) -> Result<()> {
        Ok(())
    }
}

/// Switches the capture triggers of touched tables to skip replication
/// activity.
///
/// Remembers per side which tables were already switched, so it can be
/// called before every mutation while the connection is asked only once per
/// table.
pub struct TriggerModeSwitcher {
    session: Session,
    switched: Pair<HashSet<String>>,
}

impl TriggerModeSwitcher {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            switched: Pair::default(),
        }
    }

    pub fn exclude_replication_activity(&mut self, side: Side, table: &str) -> Result<()> {
        if self.switched.get(side).contains(table) {
            return Ok(());
        }
        self.session
            .lock(side)
            .exclude_replication_activity(table)
            .map_err(|source| Error::transaction(side, TxAction::Capture, source))?;
        tracing::debug!(%side, table, "capture triggers now skip replication activity");
        self.switched.get_mut(side).insert(table.to_string());
        Ok(())
    }

    pub fn is_switched(&self, side: Side, table: &str) -> bool {
        self.switched.get(side).contains(table)
    }
}

/// Committer grouping mutations into commit windows.
///
/// Both sides run inside an open transaction for the whole table sync. After
/// every `commit_frequency` accepted mutations both transactions are
/// committed and reopened before the triggering call returns.
///
/// If the activity marker table (`<repPrefix>_running_flags`) exists on the
/// left database, a marker row is written on each side right after a
/// transaction opens and removed right before it commits. Capture triggers
/// switched by the [`TriggerModeSwitcher`] ignore writes made while the
/// marker is present, so the sync's own changes are not replicated back.
pub struct BufferedCommitter {
    session: Session,
    switcher: TriggerModeSwitcher,
    commit_frequency: usize,
    /// Accepted mutations since the last commit, always below the frequency
    change_counter: usize,
    marker_table: String,
    maintain_activity: bool,
    open: Pair<bool>,
    windows_committed: usize,
}

impl BufferedCommitter {
    /// Create a committer for `session`.
    ///
    /// Fails with a configuration error if `commitFrequency` is zero.
    /// Transactions are opened by [`Committer::begin`].
    pub fn new(session: Session, options: &SyncOptions) -> Result<Self> {
        let commit_frequency = options.effective_commit_frequency();
        if commit_frequency == 0 {
            return Err(Error::configuration("commitFrequency", "0"));
        }

        let marker_table = options.activity_marker_table();
        let maintain_activity = session
            .lock(Side::Left)
            .table_exists(&marker_table)
            .map_err(|source| Error::transaction(Side::Left, TxAction::Capture, source))?;

        Ok(Self {
            switcher: TriggerModeSwitcher::new(session.clone()),
            session,
            commit_frequency,
            change_counter: 0,
            marker_table,
            maintain_activity,
            open: Pair::default(),
            windows_committed: 0,
        })
    }

    pub fn commit_frequency(&self) -> usize {
        self.commit_frequency
    }

    pub fn change_counter(&self) -> usize {
        self.change_counter
    }

    /// Whether activity markers are written around each transaction.
    pub fn maintains_activity(&self) -> bool {
        self.maintain_activity
    }

    /// Commit windows closed because the frequency was reached.
    pub fn windows_committed(&self) -> usize {
        self.windows_committed
    }

    pub fn is_open(&self, side: Side) -> bool {
        *self.open.get(side)
    }

    fn begin_transactions(&mut self) -> Result<()> {
        for side in Side::BOTH {
            let mut connection = self.session.lock(side);
            connection
                .begin_transaction()
                .map_err(|source| Error::transaction(side, TxAction::Begin, source))?;
            *self.open.get_mut(side) = true;

            if self.maintain_activity {
                connection
                    .insert_activity_marker(&self.marker_table)
                    .map_err(|source| Error::transaction(side, TxAction::Marker, source))?;
            }
        }
        Ok(())
    }

    fn commit_transactions(&mut self) -> Result<()> {
        for side in Side::BOTH {
            if !self.is_open(side) {
                continue;
            }
            let mut connection = self.session.lock(side);
            if self.maintain_activity {
                connection
                    .clear_activity_markers(&self.marker_table)
                    .map_err(|source| Error::transaction(side, TxAction::Marker, source))?;
            }
            connection
                .commit_transaction()
                .map_err(|source| Error::transaction(side, TxAction::Commit, source))?;
            *self.open.get_mut(side) = false;
        }
        Ok(())
    }

    /// Roll back every open side; a failure on one side does not stop the
    /// other from being rolled back. Returns the first failure.
    fn rollback_transactions(&mut self) -> Result<()> {
        let mut first_error = None;
        for side in Side::BOTH {
            if !self.is_open(side) {
                continue;
            }
            let outcome = self.session.lock(side).rollback_transaction();
            *self.open.get_mut(side) = false;
            if let Err(source) = outcome {
                tracing::warn!(%side, error = %source, "rollback failed");
                if first_error.is_none() {
                    first_error = Some(Error::transaction(side, TxAction::Rollback, source));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn change_accepted(&mut self) -> Result<()> {
        self.change_counter += 1;
        if self.change_counter >= self.commit_frequency {
            self.change_counter = 0;
            self.commit_transactions()?;
            self.begin_transactions()?;
            self.windows_committed += 1;
            tracing::debug!(
                window = self.windows_committed,
                frequency = self.commit_frequency,
                "commit window closed"
            );
        }
        Ok(())
    }
}

impl Committer for BufferedCommitter {
    fn begin(&mut self) -> Result<()> {
        self.begin_transactions()
    }

    fn apply(&mut self, side: Side, table: &str, mutation: Mutation<'_>) -> Result<()> {
        self.switcher
            .exclude_replication_activity(side, table)
            .map_err(|err| match err {
                Error::Transaction {
                    source: source @ ConnectionError::TableNotFound(_),
                    ..
                } => Error::mutation(side, table, mutation.kind(), source),
                other => other,
            })?;
        mutation.execute(&self.session, side, table)?;
        self.change_accepted()
    }

    fn is_new_transaction_boundary(&self) -> bool {
        self.change_counter == 0
    }

    fn finalize(&mut self, success: bool) -> Result<()> {
        if success {
            self.commit_transactions()
        } else {
            tracing::warn!(
                pending = self.change_counter,
                "rolling back uncommitted sync changes"
            );
            self.rollback_transactions()
        }
    }
}

impl Drop for BufferedCommitter {
    fn drop(&mut self) {
        if self.open.iter().any(|(_, open)| *open) {
            tracing::warn!("buffered committer dropped without finalize, rolling back");
            let _ = self.rollback_transactions();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FailPoint;
    use crate::{Connection, MemoryDatabase};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    const MARKER: &str = "rr_running_flags";

    fn row(value: serde_json::Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    fn database(with_marker: bool) -> Arc<Mutex<MemoryDatabase>> {
        let mut db = MemoryDatabase::new().with_table("users", &["id"]);
        if with_marker {
            db = db.with_marker_table(MARKER);
        }
        Arc::new(Mutex::new(db))
    }

    type Db = Arc<Mutex<MemoryDatabase>>;

    fn setup(with_marker: bool) -> (Db, Db, Session) {
        let left = database(with_marker);
        let right = database(with_marker);
        let session = Session::new(left.clone(), right.clone());
        (left, right, session)
    }

    fn buffered(session: Session, frequency: usize) -> BufferedCommitter {
        let options = SyncOptions::default().with_commit_frequency(frequency);
        let mut committer = BufferedCommitter::new(session, &options).unwrap();
        committer.begin().unwrap();
        committer
    }

    #[test]
    fn default_committer_auto_commits() {
        let (left, _right, session) = setup(false);
        let mut committer = DefaultCommitter::new(session);
        committer.begin().unwrap();

        committer
            .insert_record(Side::Left, "users", &row(json!({"id": 1, "name": "Alice"})))
            .unwrap();

        let db = left.lock();
        assert!(!db.in_transaction());
        assert_eq!(db.committed_rows("users").len(), 1);
        assert!(!committer.is_new_transaction_boundary());
    }

    #[test]
    fn default_committer_propagates_mutation_errors() {
        let (_left, _right, session) = setup(false);
        let mut committer = DefaultCommitter::new(session);

        let err = committer
            .delete_record(Side::Right, "users", &row(json!({"id": 1})))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Mutation {
                side: Side::Right,
                kind: MutationKind::Delete,
                source: ConnectionError::RowNotFound { .. },
                ..
            }
        ));
        committer.finalize(false).unwrap();
    }

    #[test]
    fn buffered_commits_every_window() {
        let (left, right, session) = setup(false);
        let mut committer = buffered(session, 3);

        for id in 0..7 {
            committer
                .insert_record(Side::Right, "users", &row(json!({"id": id})))
                .unwrap();
        }

        assert_eq!(committer.windows_committed(), 2);
        assert_eq!(committer.change_counter(), 1);
        assert_eq!(right.lock().commit_count(), 2);
        assert_eq!(left.lock().commit_count(), 2);
        assert_eq!(right.lock().committed_rows("users").len(), 6);
        assert_eq!(right.lock().rows("users").len(), 7);
    }

    #[test]
    fn new_transaction_boundary_after_window() {
        let (_left, _right, session) = setup(false);
        let mut committer = buffered(session, 2);
        assert!(committer.is_new_transaction_boundary());

        committer
            .insert_record(Side::Left, "users", &row(json!({"id": 1})))
            .unwrap();
        assert!(!committer.is_new_transaction_boundary());

        committer
            .insert_record(Side::Left, "users", &row(json!({"id": 2})))
            .unwrap();
        assert!(committer.is_new_transaction_boundary());
    }

    #[test]
    fn finalize_success_commits_pending() {
        let (left, right, session) = setup(false);
        let mut committer = buffered(session, 100);
        committer
            .insert_record(Side::Left, "users", &row(json!({"id": 1})))
            .unwrap();
        committer
            .insert_record(Side::Right, "users", &row(json!({"id": 2})))
            .unwrap();

        committer.finalize(true).unwrap();

        assert_eq!(left.lock().committed_rows("users").len(), 1);
        assert_eq!(right.lock().committed_rows("users").len(), 1);
        assert!(!left.lock().in_transaction());
        assert!(!right.lock().in_transaction());
    }

    #[test]
    fn finalize_failure_rolls_back_pending() {
        let (left, right, session) = setup(false);
        let mut committer = buffered(session, 2);
        for id in 0..3 {
            committer
                .insert_record(Side::Left, "users", &row(json!({"id": id})))
                .unwrap();
        }

        committer.finalize(false).unwrap();

        // The first window was committed, the third insert is gone
        assert_eq!(left.lock().rows("users").len(), 2);
        assert_eq!(left.lock().rollback_count(), 1);
        assert_eq!(right.lock().rollback_count(), 1);
        assert!(!right.lock().in_transaction());
    }

    #[test]
    fn activity_marker_follows_transactions() {
        let (left, right, session) = setup(true);
        let options = SyncOptions::default().with_commit_frequency(2);
        let mut committer = BufferedCommitter::new(session, &options).unwrap();
        assert!(committer.maintains_activity());
        assert_eq!(left.lock().marker_count(MARKER), 0);

        committer.begin().unwrap();
        assert_eq!(left.lock().marker_count(MARKER), 1);
        assert_eq!(right.lock().marker_count(MARKER), 1);

        committer
            .insert_record(Side::Right, "users", &row(json!({"id": 1})))
            .unwrap();
        committer
            .insert_record(Side::Right, "users", &row(json!({"id": 2})))
            .unwrap();

        // Window reopened: marker present again, and nothing committed with it
        assert_eq!(right.lock().marker_count(MARKER), 1);

        committer.finalize(true).unwrap();
        assert_eq!(left.lock().marker_count(MARKER), 0);
        assert_eq!(right.lock().marker_count(MARKER), 0);
    }

    #[test]
    fn no_marker_without_marker_table() {
        let (left, _right, session) = setup(false);
        let committer = buffered(session, 10);
        assert!(!committer.maintains_activity());
        assert_eq!(left.lock().marker_count(MARKER), 0);
    }

    #[test]
    fn own_writes_are_not_captured() {
        let (_left, right, session) = setup(true);
        let mut committer = buffered(session, 10);
        committer
            .insert_record(Side::Right, "users", &row(json!({"id": 1})))
            .unwrap();
        committer.finalize(true).unwrap();

        let db = right.lock();
        assert_eq!(db.committed_rows("users").len(), 1);
        assert!(db.captured_changes().is_empty());
        assert!(db.is_excluding_replication_activity("users"));
    }

    #[test]
    fn switcher_called_once_per_table() {
        let (_left, right, session) = setup(true);
        let mut committer = buffered(session, 10);
        for id in 0..5 {
            committer
                .insert_record(Side::Right, "users", &row(json!({"id": id})))
                .unwrap();
        }
        assert_eq!(right.lock().exclusion_calls(), 1);
        assert!(committer.switcher.is_switched(Side::Right, "users"));
        assert!(!committer.switcher.is_switched(Side::Left, "users"));
    }

    #[test]
    fn failed_mutation_leaves_counter_unchanged() {
        let (_left, right, session) = setup(false);
        let mut committer = buffered(session, 10);
        committer
            .insert_record(Side::Right, "users", &row(json!({"id": 1})))
            .unwrap();

        right.lock().inject_failure(FailPoint::Insert);
        let err = committer
            .insert_record(Side::Right, "users", &row(json!({"id": 2})))
            .unwrap_err();
        assert!(matches!(err, Error::Mutation { .. }));
        assert_eq!(committer.change_counter(), 1);
    }

    #[test]
    fn unknown_table_is_mutation_error() {
        let (_left, right, session) = setup(true);
        let mut committer = buffered(session, 10);

        let err = committer
            .insert_record(Side::Right, "orders", &row(json!({"id": 1})))
            .unwrap_err();
        assert_eq!(
            err,
            Error::mutation(
                Side::Right,
                "orders",
                MutationKind::Insert,
                ConnectionError::TableNotFound("orders".into())
            )
        );
        assert!(!committer.switcher.is_switched(Side::Right, "orders"));
        assert_eq!(committer.change_counter(), 0);

        committer.finalize(false).unwrap();
        assert!(!right.lock().in_transaction());
    }

    #[test]
    fn commit_failure_is_transaction_error() {
        let (left, _right, session) = setup(false);
        let mut committer = buffered(session, 1);

        left.lock().inject_failure(FailPoint::Commit);
        let err = committer
            .insert_record(Side::Left, "users", &row(json!({"id": 1})))
            .unwrap_err();
        assert_eq!(
            err,
            Error::transaction(
                Side::Left,
                TxAction::Commit,
                ConnectionError::Backend("injected commit failure".into())
            )
        );

        committer.finalize(false).unwrap();
        assert!(left.lock().rows("users").is_empty());
    }

    #[test]
    fn zero_frequency_rejected() {
        let (_left, _right, session) = setup(false);
        let options = SyncOptions::default().with_commit_frequency(0);
        let err = BufferedCommitter::new(session, &options).err().unwrap();
        assert_eq!(err, Error::configuration("commitFrequency", "0"));
    }

    #[test]
    fn drop_without_finalize_rolls_back() {
        let (left, _right, session) = setup(false);
        {
            let mut committer = buffered(session, 10);
            committer
                .insert_record(Side::Left, "users", &row(json!({"id": 1})))
                .unwrap();
        }
        let db = left.lock();
        assert!(!db.in_transaction());
        assert!(db.rows("users").is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_commit_windows(mutations in 0usize..60, frequency in 1usize..12) {
                let (left, right, session) = setup(true);
                let mut committer = buffered(session, frequency);

                for id in 0..mutations {
                    committer
                        .insert_record(Side::Right, "users", &row(json!({"id": id})))
                        .unwrap();
                    prop_assert!(committer.change_counter() < frequency);
                    prop_assert_eq!(right.lock().marker_count(MARKER), 1);
                }

                prop_assert_eq!(committer.windows_committed(), mutations / frequency);
                prop_assert_eq!(right.lock().commit_count(), mutations / frequency);
                prop_assert_eq!(left.lock().commit_count(), mutations / frequency);
                prop_assert_eq!(committer.change_counter(), mutations % frequency);

                committer.finalize(true).unwrap();
                prop_assert_eq!(right.lock().committed_rows("users").len(), mutations);
                prop_assert_eq!(right.lock().marker_count(MARKER), 0);
            }

            #[test]
            fn prop_rollback_discards_open_window(mutations in 0usize..40, frequency in 1usize..8) {
                let (_left, right, session) = setup(false);
                let mut committer = buffered(session, frequency);

                for id in 0..mutations {
                    committer
                        .insert_record(Side::Right, "users", &row(json!({"id": id})))
                        .unwrap();
                }
                committer.finalize(false).unwrap();

                let durable = (mutations / frequency) * frequency;
                prop_assert_eq!(right.lock().rows("users").len(), durable);
            }
        }
    }
}
