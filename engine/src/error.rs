//! Error types for the duplex engine.

use crate::Side;
use std::fmt;
use thiserror::Error;

/// Errors reported by a [`Connection`](crate::Connection).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("duplicate primary key in {table}: {key}")]
    DuplicateKey { table: String, key: String },

    #[error("row not found in {table}: {key}")]
    RowNotFound { table: String, key: String },

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("row is missing primary key column '{column}' of {table}")]
    MissingKey { table: String, column: String },

    #[error("no transaction is open")]
    NoTransaction,

    #[error("a transaction is already open")]
    TransactionActive,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Transaction lifecycle step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    Begin,
    Commit,
    Rollback,
    /// Writing or clearing the activity marker
    Marker,
    /// Switching trigger capture mode or probing the marker table
    Capture,
}

impl fmt::Display for TxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxAction::Begin => "begin",
            TxAction::Commit => "commit",
            TxAction::Rollback => "rollback",
            TxAction::Marker => "activity marker",
            TxAction::Capture => "capture mode switch",
        })
    }
}

/// Mutating statement that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        })
    }
}

/// All possible errors from the duplex engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("invalid value for {option}: {value}")]
    Configuration { option: &'static str, value: String },

    #[error("unknown committer: {0}")]
    UnknownCommitter(String),

    #[error("unknown syncer: {0}")]
    UnknownSyncer(String),

    // Database errors
    #[error("{action} failed on {side} database: {source}")]
    Transaction {
        side: Side,
        action: TxAction,
        #[source]
        source: ConnectionError,
    },

    #[error("{kind} on {side}.{table} failed: {source}")]
    Mutation {
        side: Side,
        table: String,
        kind: MutationKind,
        #[source]
        source: ConnectionError,
    },

    // Handler errors
    #[error("sync handler failed: {0}")]
    Handler(String),
}

impl Error {
    pub(crate) fn configuration(option: &'static str, value: impl Into<String>) -> Self {
        Error::Configuration {
            option,
            value: value.into(),
        }
    }

    pub(crate) fn transaction(side: Side, action: TxAction, source: ConnectionError) -> Self {
        Error::Transaction {
            side,
            action,
            source,
        }
    }

    pub(crate) fn mutation(
        side: Side,
        table: &str,
        kind: MutationKind,
        source: ConnectionError,
    ) -> Self {
        Error::Mutation {
            side,
            table: table.to_string(),
            kind,
            source,
        }
    }

    /// Whether this error was raised while validating configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. } | Error::UnknownCommitter(_) | Error::UnknownSyncer(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading [`SyncOptions`](crate::SyncOptions) from the
/// environment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid boolean in {var}: {value}")]
    InvalidBool { var: String, value: String },

    #[error("invalid {var} value: {value}")]
    InvalidNumber { var: String, value: String },

    #[error("invalid direction in {var}: {value}")]
    InvalidDirection { var: String, value: String },

    #[error("invalid sync event in {var}: {value}")]
    InvalidSyncEvent { var: String, value: String },

    #[error("failed to read {path}: {message}")]
    Dotenv { path: String, message: String },
}
