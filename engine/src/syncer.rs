//! Syncers decide what to do about each difference.
//!
//! A syncer is built once per table sync from the [`SyncOptions`] and is
//! immutable afterwards. It never touches a database: every action goes
//! through the [`SyncHelper`], and each difference results in at most one
//! mutating call (custom handlers take over full responsibility).

use crate::helper::SyncOutcome;
use crate::options::{HandlingSetting, LoggedSyncEvent};
use crate::{Difference, Error, Pair, Result, Row, Side, SyncHelper, SyncOptions};
use std::fmt;
use std::sync::Arc;

/// User supplied handling for a difference.
///
/// Receives the helper and the difference exactly as reported by the
/// scanner. No built-in action is taken besides calling it.
pub type DifferenceHandler =
    Arc<dyn Fn(&mut dyn SyncHelper, &Difference) -> Result<()> + Send + Sync>;

/// Reconciliation policy for one table sync.
pub trait Syncer: Send {
    /// Reconcile a single difference.
    fn sync_difference(&self, helper: &mut dyn SyncHelper, diff: &Difference) -> Result<()>;
}

/// One-directional sync towards the `direction` side (the target); the
/// other side is authoritative.
///
/// - rows only in the source are inserted into the target unless `noInsert`
/// - rows only in the target are deleted if `delete`
/// - conflicts overwrite the target with the source row unless `noUpdate`
#[derive(Debug, Clone)]
pub struct OneWaySyncer {
    target: Side,
    insert: bool,
    update: bool,
    delete: bool,
}

impl OneWaySyncer {
    pub fn new(options: &SyncOptions) -> Self {
        Self {
            target: options.direction,
            insert: !options.no_insert,
            update: !options.no_update,
            delete: options.delete,
        }
    }

    pub fn source(&self) -> Side {
        self.target.opposite()
    }

    pub fn target(&self) -> Side {
        self.target
    }
}

impl Syncer for OneWaySyncer {
    fn sync_difference(&self, helper: &mut dyn SyncHelper, diff: &Difference) -> Result<()> {
        let (source, target) = (self.source(), self.target);
        match diff {
            Difference::Conflict(pair) => {
                if self.update {
                    helper.update_record(target, pair.get(source))?;
                }
            }
            Difference::LeftOnly(row) | Difference::RightOnly(row) => {
                if diff.row(source).is_some() {
                    if self.insert {
                        helper.insert_record(target, row)?;
                    }
                } else if self.delete {
                    helper.delete_record(target, row)?;
                }
            }
        }
        Ok(())
    }
}

/// What to do with a row that exists on one side only.
#[derive(Clone)]
pub enum RecordPolicy {
    Ignore,
    /// Delete it from the side it exists on
    Delete,
    /// Insert it into the other side
    Insert,
    Custom(DifferenceHandler),
}

impl RecordPolicy {
    /// Validate a handling setting. `option` names the setting in errors.
    pub fn resolve(option: &'static str, setting: &HandlingSetting) -> Result<Self> {
        match setting {
            HandlingSetting::Custom(handler) => Ok(RecordPolicy::Custom(handler.clone())),
            HandlingSetting::Named(name) => match name.trim() {
                "ignore" => Ok(RecordPolicy::Ignore),
                "delete" => Ok(RecordPolicy::Delete),
                "insert" => Ok(RecordPolicy::Insert),
                other => Err(Error::configuration(option, other)),
            },
        }
    }
}

impl fmt::Debug for RecordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordPolicy::Ignore => f.write_str("Ignore"),
            RecordPolicy::Delete => f.write_str("Delete"),
            RecordPolicy::Insert => f.write_str("Insert"),
            RecordPolicy::Custom(_) => f.write_str("Custom(<handler>)"),
        }
    }
}

/// What to do with a row that differs between both sides.
#[derive(Clone)]
pub enum ConflictPolicy {
    Ignore,
    /// Overwrite the left row with the right one
    UpdateLeft,
    /// Overwrite the right row with the left one
    UpdateRight,
    Custom(DifferenceHandler),
}

impl ConflictPolicy {
    /// Validate a handling setting. `option` names the setting in errors.
    pub fn resolve(option: &'static str, setting: &HandlingSetting) -> Result<Self> {
        match setting {
            HandlingSetting::Custom(handler) => Ok(ConflictPolicy::Custom(handler.clone())),
            HandlingSetting::Named(name) => match name.trim() {
                "ignore" => Ok(ConflictPolicy::Ignore),
                "updateLeft" | "update_left" | "rightWins" | "right_wins" => {
                    Ok(ConflictPolicy::UpdateLeft)
                }
                "updateRight" | "update_right" | "leftWins" | "left_wins" => {
                    Ok(ConflictPolicy::UpdateRight)
                }
                other => Err(Error::configuration(option, other)),
            },
        }
    }
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Ignore => f.write_str("Ignore"),
            ConflictPolicy::UpdateLeft => f.write_str("UpdateLeft"),
            ConflictPolicy::UpdateRight => f.write_str("UpdateRight"),
            ConflictPolicy::Custom(_) => f.write_str("Custom(<handler>)"),
        }
    }
}

/// Bidirectional sync driven by per-kind policies.
///
/// Policies are validated on construction, so a bad option fails the table
/// sync before any difference is processed.
#[derive(Debug, Clone)]
pub struct TwoWaySyncer {
    record_policies: Pair<RecordPolicy>,
    conflict_policy: ConflictPolicy,
    logged_events: Vec<LoggedSyncEvent>,
}

impl TwoWaySyncer {
    pub fn new(options: &SyncOptions) -> Result<Self> {
        let record_policies = Pair::new(
            RecordPolicy::resolve("leftRecordHandling", &options.left_record_handling)?,
            RecordPolicy::resolve("rightRecordHandling", &options.right_record_handling)?,
        );
        let conflict_policy =
            ConflictPolicy::resolve("syncConflictHandling", &options.sync_conflict_handling)?;

        Ok(Self {
            record_policies,
            conflict_policy,
            logged_events: options.logged_sync_events.clone(),
        })
    }

    pub fn record_policy(&self, side: Side) -> &RecordPolicy {
        self.record_policies.get(side)
    }

    pub fn conflict_policy(&self) -> &ConflictPolicy {
        &self.conflict_policy
    }

    fn should_log(&self, conflict: bool, outcome: &SyncOutcome) -> bool {
        let (ignored, all) = if conflict {
            (LoggedSyncEvent::IgnoredConflicts, LoggedSyncEvent::AllConflicts)
        } else {
            (LoggedSyncEvent::IgnoredChanges, LoggedSyncEvent::AllChanges)
        };
        self.logged_events.contains(&all)
            || (*outcome == SyncOutcome::Ignored && self.logged_events.contains(&ignored))
    }

    fn sync_record(
        &self,
        helper: &mut dyn SyncHelper,
        diff: &Difference,
        side: Side,
        row: &Row,
    ) -> Result<SyncOutcome> {
        match self.record_policy(side) {
            RecordPolicy::Ignore => Ok(SyncOutcome::Ignored),
            RecordPolicy::Delete => {
                helper.delete_record(side, row)?;
                Ok(SyncOutcome::Deleted(side))
            }
            RecordPolicy::Insert => {
                helper.insert_record(side.opposite(), row)?;
                Ok(SyncOutcome::Inserted(side.opposite()))
            }
            RecordPolicy::Custom(handler) => {
                handler(&mut *helper, diff)?;
                Ok(SyncOutcome::Custom)
            }
        }
    }

    fn sync_conflict(
        &self,
        helper: &mut dyn SyncHelper,
        diff: &Difference,
        pair: &Pair<Row>,
    ) -> Result<SyncOutcome> {
        match &self.conflict_policy {
            ConflictPolicy::Ignore => Ok(SyncOutcome::Ignored),
            ConflictPolicy::UpdateLeft => {
                helper.update_record(Side::Left, pair.get(Side::Right))?;
                Ok(SyncOutcome::Updated(Side::Left))
            }
            ConflictPolicy::UpdateRight => {
                helper.update_record(Side::Right, pair.get(Side::Left))?;
                Ok(SyncOutcome::Updated(Side::Right))
            }
            ConflictPolicy::Custom(handler) => {
                handler(&mut *helper, diff)?;
                Ok(SyncOutcome::Custom)
            }
        }
    }
}

impl Syncer for TwoWaySyncer {
    fn sync_difference(&self, helper: &mut dyn SyncHelper, diff: &Difference) -> Result<()> {
        let (conflict, outcome) = match diff {
            Difference::LeftOnly(row) => (false, self.sync_record(helper, diff, Side::Left, row)?),
            Difference::RightOnly(row) => {
                (false, self.sync_record(helper, diff, Side::Right, row)?)
            }
            Difference::Conflict(pair) => (true, self.sync_conflict(helper, diff, pair)?),
        };

        if self.should_log(conflict, &outcome) {
            helper.log_sync_outcome(diff, outcome);
        }
        Ok(())
    }
}
