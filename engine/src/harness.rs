//! Test harness support: a committer that never commits.
//!
//! Test suites run syncs against fixture databases that must look untouched
//! afterwards. [`NeverCommitter`] opens a transaction on both sides and never
//! commits it. The [`RollbackHarness`] remembers the last session such a
//! committer worked on, so the fixture can roll it back after the sync (and
//! the committer) are gone. Building a new `NeverCommitter` first rolls back
//! whatever session the harness still points to.
//!
//! The harness is an explicit object handed to the tests that need it;
//! nothing outside of this module refers to it. It is meant for
//! single-threaded test orchestration and must not be shared between
//! concurrently running syncs.

use crate::committer::{Committer, Mutation};
use crate::error::TxAction;
use crate::registry::CommitterRegistry;
use crate::{Error, Result, Session, Side};
use parking_lot::Mutex;
use std::sync::Arc;

/// Registry key of the [`NeverCommitter`].
pub const NEVER_COMMIT: &str = "never_commit";

/// Holder of the last session used by a [`NeverCommitter`].
///
/// Clones share the same pointer.
#[derive(Clone, Default)]
pub struct RollbackHarness {
    current: Arc<Mutex<Option<Session>>>,
}

impl RollbackHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session of the most recent `NeverCommitter`, if not yet rolled
    /// back.
    pub fn current_session(&self) -> Option<Session> {
        self.current.lock().clone()
    }

    pub fn set_current_session(&self, session: Session) {
        *self.current.lock() = Some(session);
    }

    /// Roll back the open transactions of the remembered session, if any.
    ///
    /// Both sides are attempted; the first failure is returned.
    pub fn rollback_current_session(&self) -> Result<()> {
        let Some(session) = self.current.lock().take() else {
            return Ok(());
        };

        let mut first_error = None;
        for side in Side::BOTH {
            let mut connection = session.lock(side);
            if !connection.in_transaction() {
                continue;
            }
            if let Err(source) = connection.rollback_transaction() {
                tracing::warn!(%side, error = %source, "harness rollback failed");
                if first_error.is_none() {
                    first_error = Some(Error::transaction(side, TxAction::Rollback, source));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Register [`NeverCommitter`] under [`NEVER_COMMIT`], bound to this
    /// harness.
    pub fn install(&self, registry: &mut CommitterRegistry) {
        let harness = self.clone();
        registry.register(NEVER_COMMIT, move |session, _options| {
            Ok(Box::new(NeverCommitter::new(session, &harness)?) as Box<dyn Committer>)
        });
    }
}

/// Committer that keeps everything in a transaction that is never
/// committed.
pub struct NeverCommitter {
    session: Session,
}

impl NeverCommitter {
    /// Roll back the harness's previous session, then make `session` the
    /// current one.
    pub fn new(session: Session, harness: &RollbackHarness) -> Result<Self> {
        harness.rollback_current_session()?;
        harness.set_current_session(session.clone());
        Ok(Self { session })
    }
}

impl Committer for NeverCommitter {
    fn begin(&mut self) -> Result<()> {
        for side in Side::BOTH {
            self.session
                .lock(side)
                .begin_transaction()
                .map_err(|source| Error::transaction(side, TxAction::Begin, source))?;
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, MemoryDatabase, Row, SyncOptions};
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    fn database() -> Arc<Mutex<MemoryDatabase>> {
        Arc::new(Mutex::new(MemoryDatabase::new().with_table("users", &["id"])))
    }

    #[test]
    fn never_commits() {
        let (left, right) = (database(), database());
        let harness = RollbackHarness::new();
        let mut committer =
            NeverCommitter::new(Session::new(left.clone(), right.clone()), &harness).unwrap();
        committer.begin().unwrap();

        committer
            .insert_record(Side::Left, "users", &row(json!({"id": 1})))
            .unwrap();
        committer.finalize(true).unwrap();

        let db = left.lock();
        assert!(db.in_transaction());
        assert_eq!(db.rows("users").len(), 1);
        assert!(db.committed_rows("users").is_empty());
        assert_eq!(db.commit_count(), 0);
    }

    #[test]
    fn rollback_after_committer_is_gone() {
        let (left, right) = (database(), database());
        let harness = RollbackHarness::new();
        {
            let mut committer =
                NeverCommitter::new(Session::new(left.clone(), right.clone()), &harness).unwrap();
            committer.begin().unwrap();
            committer
                .insert_record(Side::Right, "users", &row(json!({"id": 1})))
                .unwrap();
        }
        assert!(harness.current_session().is_some());

        harness.rollback_current_session().unwrap();

        assert!(right.lock().rows("users").is_empty());
        assert!(!right.lock().in_transaction());
        assert!(!left.lock().in_transaction());
        assert!(harness.current_session().is_none());
    }

    #[test]
    fn new_committer_rolls_back_previous_session() {
        let (first_left, first_right) = (database(), database());
        let harness = RollbackHarness::new();

        let mut first = NeverCommitter::new(
            Session::new(first_left.clone(), first_right.clone()),
            &harness,
        )
        .unwrap();
        first.begin().unwrap();
        first
            .insert_record(Side::Left, "users", &row(json!({"id": 1})))
            .unwrap();

        let second_session = Session::new(database(), database());
        let _second = NeverCommitter::new(second_session.clone(), &harness).unwrap();

        assert!(first_left.lock().rows("users").is_empty());
        assert!(!first_left.lock().in_transaction());
        assert!(harness.current_session().unwrap().same_as(&second_session));
    }

    #[test]
    fn rollback_without_session_is_noop() {
        let harness = RollbackHarness::new();
        harness.rollback_current_session().unwrap();
    }

    #[test]
    fn installs_into_registry() {
        let harness = RollbackHarness::new();
        let mut registry = CommitterRegistry::builtin();
        harness.install(&mut registry);
        assert!(registry.contains(NEVER_COMMIT));

        let (left, right) = (database(), database());
        let session = Session::new(left.clone(), right);
        let mut committer = registry
            .create(NEVER_COMMIT, session.clone(), &SyncOptions::default())
            .unwrap();
        committer.begin().unwrap();

        assert!(left.lock().in_transaction());
        assert!(harness.current_session().unwrap().same_as(&session));
    }
}
