//! Database connection boundary.
//!
//! The engine never talks SQL. Everything it needs from a database is
//! expressed by the [`Connection`] trait, implemented by the dialect
//! adapters (and by [`MemoryDatabase`](crate::MemoryDatabase) in-process).

use crate::error::ConnectionError;
use crate::{Pair, Row, Side};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Result type for connection calls.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Blocking access to one database.
///
/// Mutations run inside the open transaction if there is one and are
/// auto-committed otherwise.
pub trait Connection: Send {
    fn begin_transaction(&mut self) -> ConnectionResult<()>;

    fn commit_transaction(&mut self) -> ConnectionResult<()>;

    fn rollback_transaction(&mut self) -> ConnectionResult<()>;

    /// Whether a transaction is currently open.
    fn in_transaction(&self) -> bool;

    fn table_exists(&self, table: &str) -> ConnectionResult<bool>;

    fn insert_record(&mut self, table: &str, values: &Row) -> ConnectionResult<()>;

    /// Update the row identified by `old_key`, or by the key columns of
    /// `values` when no old key is given.
    fn update_record(
        &mut self,
        table: &str,
        values: &Row,
        old_key: Option<&Row>,
    ) -> ConnectionResult<()>;

    /// Delete the row identified by the key columns of `key`.
    fn delete_record(&mut self, table: &str, key: &Row) -> ConnectionResult<()>;

    /// Add a row to the activity marker table.
    fn insert_activity_marker(&mut self, marker_table: &str) -> ConnectionResult<()>;

    /// Remove all rows from the activity marker table.
    fn clear_activity_markers(&mut self, marker_table: &str) -> ConnectionResult<()>;

    /// Make the change capture triggers of `table` skip writes performed
    /// while an activity marker is present.
    fn exclude_replication_activity(&mut self, table: &str) -> ConnectionResult<()>;
}

/// A connection shared between a session and whoever owns the database.
pub type SharedConnection = Arc<Mutex<dyn Connection>>;

/// Wrap a connection for use in a [`Session`].
pub fn shared<C: Connection + 'static>(connection: C) -> SharedConnection {
    Arc::new(Mutex::new(connection))
}

/// The pair of connections a table sync works against.
#[derive(Clone)]
pub struct Session {
    connections: Pair<SharedConnection>,
}

impl Session {
    pub fn new(left: SharedConnection, right: SharedConnection) -> Self {
        Self {
            connections: Pair::new(left, right),
        }
    }

    pub fn connection(&self, side: Side) -> &SharedConnection {
        self.connections.get(side)
    }

    /// Lock the connection of `side` for the duration of the guard.
    pub fn lock(&self, side: Side) -> MutexGuard<'_, dyn Connection> {
        self.connections.get(side).lock()
    }

    /// Whether both handles point at the same connections as `other`.
    pub fn same_as(&self, other: &Session) -> bool {
        Side::BOTH
            .iter()
            .all(|&side| Arc::ptr_eq(self.connection(side), other.connection(side)))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
