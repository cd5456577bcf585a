//! Sync options resolved once per table sync.
//!
//! Options arrive from the external configuration loader (deserialized with
//! serde) or from `DUPLEX_*` environment variables. Custom difference
//! handlers cannot be expressed in configuration files and are attached in
//! code.

use crate::error::ConfigError;
use crate::syncer::DifferenceHandler;
use crate::{Difference, Result, Side, SyncHelper};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Commit window size used when `commitFrequency` is not set.
pub const DEFAULT_COMMIT_FREQUENCY: usize = 1000;

/// Prefix of the replication bookkeeping tables when none is configured.
pub const DEFAULT_REP_PREFIX: &str = "rr";

/// Unresolved value of a handling option.
///
/// Named values are validated into policies when the syncer is built, so an
/// invalid name is reported before any difference is processed.
#[derive(Clone)]
pub enum HandlingSetting {
    Named(String),
    Custom(DifferenceHandler),
}

impl HandlingSetting {
    pub fn named(name: impl Into<String>) -> Self {
        HandlingSetting::Named(name.into())
    }

    /// Wrap a closure as a custom handler.
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(&mut dyn SyncHelper, &Difference) -> Result<()> + Send + Sync + 'static,
    {
        HandlingSetting::Custom(Arc::new(handler))
    }
}

impl fmt::Debug for HandlingSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlingSetting::Named(name) => f.debug_tuple("Named").field(name).finish(),
            HandlingSetting::Custom(_) => f.write_str("Custom(<handler>)"),
        }
    }
}

impl<'de> Deserialize<'de> for HandlingSetting {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(HandlingSetting::Named)
    }
}

/// Classes of sync outcomes that are written to the sync event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoggedSyncEvent {
    /// One-sided rows that were left alone
    IgnoredChanges,
    /// Conflicts that were left alone
    IgnoredConflicts,
    /// Every one-sided row, whatever happened to it
    AllChanges,
    /// Every conflict, whatever happened to it
    AllConflicts,
}

impl std::str::FromStr for LoggedSyncEvent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "ignoredChanges" | "ignored_changes" => Ok(LoggedSyncEvent::IgnoredChanges),
            "ignoredConflicts" | "ignored_conflicts" => Ok(LoggedSyncEvent::IgnoredConflicts),
            "allChanges" | "all_changes" => Ok(LoggedSyncEvent::AllChanges),
            "allConflicts" | "all_conflicts" => Ok(LoggedSyncEvent::AllConflicts),
            other => Err(other.to_string()),
        }
    }
}

/// Options for one table sync.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    /// Committer registry key
    pub committer: String,
    /// Syncer registry key
    pub syncer: String,
    /// One-way sync: the side being written to
    pub direction: Side,
    /// One-way sync: delete rows that only exist in the target
    pub delete: bool,
    /// One-way sync: never insert into the target
    pub no_insert: bool,
    /// One-way sync: never update the target
    pub no_update: bool,
    /// Two-way sync: rows existing only in the left table
    pub left_record_handling: HandlingSetting,
    /// Two-way sync: rows existing only in the right table
    pub right_record_handling: HandlingSetting,
    /// Two-way sync: rows differing between both tables
    pub sync_conflict_handling: HandlingSetting,
    /// Two-way sync: outcomes recorded in the sync event log
    pub logged_sync_events: Vec<LoggedSyncEvent>,
    /// Buffered committer: mutations per commit window
    pub commit_frequency: Option<usize>,
    /// Prefix of the replication bookkeeping tables
    pub rep_prefix: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            committer: "default".to_string(),
            syncer: "two_way".to_string(),
            direction: Side::Right,
            delete: false,
            no_insert: false,
            no_update: false,
            left_record_handling: HandlingSetting::named("insert"),
            right_record_handling: HandlingSetting::named("insert"),
            sync_conflict_handling: HandlingSetting::named("ignore"),
            logged_sync_events: vec![LoggedSyncEvent::IgnoredConflicts],
            commit_frequency: None,
            rep_prefix: DEFAULT_REP_PREFIX.to_string(),
        }
    }
}

impl SyncOptions {
    pub fn with_committer(mut self, key: impl Into<String>) -> Self {
        self.committer = key.into();
        self
    }

    pub fn with_syncer(mut self, key: impl Into<String>) -> Self {
        self.syncer = key.into();
        self
    }

    pub fn with_direction(mut self, direction: Side) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_commit_frequency(mut self, frequency: usize) -> Self {
        self.commit_frequency = Some(frequency);
        self
    }

    /// Set the handling of rows that only exist on `side`.
    pub fn with_record_handling(mut self, side: Side, setting: HandlingSetting) -> Self {
        match side {
            Side::Left => self.left_record_handling = setting,
            Side::Right => self.right_record_handling = setting,
        }
        self
    }

    pub fn with_conflict_handling(mut self, setting: HandlingSetting) -> Self {
        self.sync_conflict_handling = setting;
        self
    }

    pub fn with_left_record_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&mut dyn SyncHelper, &Difference) -> Result<()> + Send + Sync + 'static,
    {
        self.with_record_handling(Side::Left, HandlingSetting::custom(handler))
    }

    pub fn with_right_record_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&mut dyn SyncHelper, &Difference) -> Result<()> + Send + Sync + 'static,
    {
        self.with_record_handling(Side::Right, HandlingSetting::custom(handler))
    }

    pub fn with_conflict_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&mut dyn SyncHelper, &Difference) -> Result<()> + Send + Sync + 'static,
    {
        self.with_conflict_handling(HandlingSetting::custom(handler))
    }

    pub fn with_logged_sync_events(mut self, events: Vec<LoggedSyncEvent>) -> Self {
        self.logged_sync_events = events;
        self
    }

    /// Handling setting for rows that only exist on `side`.
    pub fn record_handling(&self, side: Side) -> &HandlingSetting {
        match side {
            Side::Left => &self.left_record_handling,
            Side::Right => &self.right_record_handling,
        }
    }

    /// Commit window size, defaulting when unset.
    pub fn effective_commit_frequency(&self) -> usize {
        self.commit_frequency.unwrap_or(DEFAULT_COMMIT_FREQUENCY)
    }

    /// Name of the table whose rows flag an open replication write window.
    pub fn activity_marker_table(&self) -> String {
        format!("{}_running_flags", self.rep_prefix)
    }

    pub fn logs(&self, event: LoggedSyncEvent) -> bool {
        self.logged_sync_events.contains(&event)
    }

    /// Load options from `DUPLEX_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Like [`SyncOptions::from_env`], after loading a `.env` file from the
    /// working directory if there is one.
    pub fn from_dotenv() -> std::result::Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load options from the `DUPLEX_*` entries of a `.env` file. The process
    /// environment is left untouched.
    pub fn from_dotenv_path(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let dotenv_error = |err: dotenvy::Error| ConfigError::Dotenv {
            path: path.display().to_string(),
            message: err.to_string(),
        };
        let vars = dotenvy::from_path_iter(path)
            .map_err(dotenv_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(dotenv_error)?;
        Self::from_vars(vars)
    }

    /// Load options from `(name, value)` pairs, ignoring unrelated names.
    pub fn from_vars<I, K, V>(vars: I) -> std::result::Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();

        for (name, value) in vars {
            let (name, value) = (name.as_ref(), value.as_ref());
            match name {
                "DUPLEX_COMMITTER" => options.committer = value.to_string(),
                "DUPLEX_SYNCER" => options.syncer = value.to_string(),
                "DUPLEX_DIRECTION" => {
                    options.direction = value.parse().map_err(|_| ConfigError::InvalidDirection {
                        var: name.to_string(),
                        value: value.to_string(),
                    })?
                }
                "DUPLEX_DELETE" => options.delete = parse_bool(name, value)?,
                "DUPLEX_NO_INSERT" => options.no_insert = parse_bool(name, value)?,
                "DUPLEX_NO_UPDATE" => options.no_update = parse_bool(name, value)?,
                "DUPLEX_LEFT_RECORD_HANDLING" => {
                    options.left_record_handling = HandlingSetting::named(value)
                }
                "DUPLEX_RIGHT_RECORD_HANDLING" => {
                    options.right_record_handling = HandlingSetting::named(value)
                }
                "DUPLEX_SYNC_CONFLICT_HANDLING" => {
                    options.sync_conflict_handling = HandlingSetting::named(value)
                }
                "DUPLEX_LOGGED_SYNC_EVENTS" => {
                    options.logged_sync_events = value
                        .split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(|s| {
                            s.parse::<LoggedSyncEvent>()
                                .map_err(|bad| ConfigError::InvalidSyncEvent {
                                    var: name.to_string(),
                                    value: bad,
                                })
                        })
                        .collect::<std::result::Result<_, _>>()?
                }
                "DUPLEX_COMMIT_FREQUENCY" => {
                    let frequency = value
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| ConfigError::InvalidNumber {
                            var: name.to_string(),
                            value: value.to_string(),
                        })?;
                    options.commit_frequency = Some(frequency);
                }
                "DUPLEX_REP_PREFIX" => options.rep_prefix = value.to_string(),
                _ => {}
            }
        }

        Ok(options)
    }
}

fn parse_bool(var: &str, value: &str) -> std::result::Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}
