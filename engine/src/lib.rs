//! # Duplex Engine
//!
//! Reconciliation policies for master-master table replication.
//!
//! An external scanner compares a table on two databases (the *left* and the
//! *right* side) and produces a stream of [`Difference`]s: rows that exist
//! only on one side, and rows that exist on both sides with different
//! content. This crate decides what to do with each of them and how the
//! resulting writes are grouped into transactions.
//!
//! ## Design Principles
//!
//! - **No SQL**: databases are reached through the [`Connection`] trait
//! - **Sequential**: one difference is fully reconciled before the next
//! - **Per table**: committer and syncer live for one table sync only
//! - **Always finalized**: every table sync ends in a commit or a rollback
//!
//! ## Core Concepts
//!
//! ### Syncers
//!
//! A [`Syncer`] maps a difference to at most one mutation:
//! - [`OneWaySyncer`] - copy from one side to the other (`direction`,
//!   `delete`, `noInsert`, `noUpdate`)
//! - [`TwoWaySyncer`] - per-side record handling and conflict handling,
//!   with named policies or custom handlers
//!
//! ### Committers
//!
//! A [`Committer`] decides when mutations become durable:
//! - [`DefaultCommitter`] - every statement auto-commits
//! - [`BufferedCommitter`] - commits both sides every `commitFrequency`
//!   changes and keeps its own writes out of change capture
//! - [`NeverCommitter`] - keeps everything in a transaction for test
//!   fixtures (see [`harness`])
//!
//! ### Orchestration
//!
//! [`TableSync`] resolves the configured committer and syncer, feeds them
//! the difference stream and returns [`SyncStats`].
//!
//! ## Quick Start
//!
//! ```rust
//! use duplex_engine::{Difference, MemoryDatabase, Session, Side, SyncOptions, TableSync};
//! use parking_lot::Mutex;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let left = Arc::new(Mutex::new(MemoryDatabase::new().with_table("users", &["id"])));
//! let right = Arc::new(Mutex::new(MemoryDatabase::new().with_table("users", &["id"])));
//! let session = Session::new(left.clone(), right.clone());
//!
//! let row = serde_json::from_value(json!({"id": 1, "name": "Alice"})).unwrap();
//! let options = SyncOptions::default().with_committer("buffered_commit");
//!
//! let stats = TableSync::new(session, "users", options)
//!     .run(vec![Difference::only_on(Side::Left, row)])
//!     .unwrap();
//!
//! assert_eq!(stats.inserts, 1);
//! assert_eq!(right.lock().committed_rows("users").len(), 1);
//! ```
//!
//! ## Configuration
//!
//! [`SyncOptions`] deserializes from camelCase keys and can be read from
//! `DUPLEX_*` environment variables with [`SyncOptions::from_env`].

pub mod committer;
pub mod connection;
pub mod error;
pub mod harness;
pub mod helper;
pub mod memory;
pub mod options;
pub mod registry;
pub mod row;
pub mod side;
pub mod syncer;
pub mod table_sync;

// Re-export main types at crate root
pub use committer::{BufferedCommitter, Committer, DefaultCommitter, Mutation, TriggerModeSwitcher};
pub use connection::{shared, Connection, ConnectionResult, Session, SharedConnection};
pub use error::{ConfigError, ConnectionError, Error, MutationKind, Result, TxAction};
pub use harness::{NeverCommitter, RollbackHarness, NEVER_COMMIT};
pub use helper::{SyncEvent, SyncHelper, SyncOutcome, SyncStats, TableSyncHelper};
pub use memory::{CapturedChange, FailPoint, MemoryDatabase};
pub use options::{HandlingSetting, LoggedSyncEvent, SyncOptions};
pub use registry::{CommitterRegistry, SyncerRegistry};
pub use row::{DiffKind, Difference, Row};
pub use side::{Pair, Side};
pub use syncer::{
    ConflictPolicy, DifferenceHandler, OneWaySyncer, RecordPolicy, Syncer, TwoWaySyncer,
};
pub use table_sync::{ReportPrinter, TableSync, TracingPrinter};
