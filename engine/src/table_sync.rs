//! Synchronization of one table pair.
//!
//! [`TableSync`] drives a single table synchronization: it builds the
//! committer and syncer named in the options, opens the committer's
//! transactions and then feeds the difference stream, one difference at a
//! time, to the report printers and to the syncer. The committer is always
//! finalized, with `success = false` if anything on the way failed.

use crate::helper::{SyncStats, TableSyncHelper};
use crate::registry::{CommitterRegistry, SyncerRegistry};
use crate::row::format_key;
use crate::{Difference, Pair, Result, Session, SyncOptions};

/// Observer of the difference stream.
///
/// Printers see every difference before the syncer does and cannot
/// influence what happens to it.
pub trait ReportPrinter: Send {
    fn report_difference(&mut self, table: &str, diff: &Difference);
}

/// Printer that traces each difference at debug level.
#[derive(Debug, Default)]
pub struct TracingPrinter;

impl ReportPrinter for TracingPrinter {
    fn report_difference(&mut self, table: &str, diff: &Difference) {
        tracing::debug!(
            table,
            kind = %diff.kind(),
            row = %format_key(diff.any_row()),
            "difference"
        );
    }
}

/// One table synchronization.
pub struct TableSync<'a> {
    session: Session,
    tables: Pair<String>,
    options: SyncOptions,
    committers: &'a CommitterRegistry,
    syncers: &'a SyncerRegistry,
    printers: Vec<Box<dyn ReportPrinter + 'a>>,
}

impl TableSync<'static> {
    /// Sync `table`, named the same on both sides, using the global
    /// registries.
    pub fn new(session: Session, table: impl Into<String>, options: SyncOptions) -> Self {
        let table = table.into();
        Self {
            session,
            tables: Pair::new(table.clone(), table),
            options,
            committers: CommitterRegistry::global(),
            syncers: SyncerRegistry::global(),
            printers: Vec::new(),
        }
    }
}

impl<'a> TableSync<'a> {
    /// Use different table names on the left and right side.
    pub fn with_tables(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.tables = Pair::new(left.into(), right.into());
        self
    }

    /// Resolve committers and syncers through the given registries.
    pub fn with_registries<'b>(
        self,
        committers: &'b CommitterRegistry,
        syncers: &'b SyncerRegistry,
    ) -> TableSync<'b>
    where
        'a: 'b,
    {
        TableSync {
            session: self.session,
            tables: self.tables,
            options: self.options,
            committers,
            syncers,
            printers: self.printers,
        }
    }

    pub fn with_printer(mut self, printer: impl ReportPrinter + 'a) -> Self {
        self.printers.push(Box::new(printer));
        self
    }

    pub fn tables(&self) -> &Pair<String> {
        &self.tables
    }

    /// Reconcile `differences` and finalize the committer.
    ///
    /// On failure the committer is finalized with `success = false` and the
    /// error that stopped the sync is returned.
    pub fn run<I>(mut self, differences: I) -> Result<SyncStats>
    where
        I: IntoIterator<Item = Difference>,
    {
        let span = tracing::info_span!("table_sync", table = %self.tables.left);
        let _enter = span.enter();

        // Syncer first: a bad option must not leave transactions behind.
        let syncer = self.syncers.create(&self.options.syncer, &self.options)?;
        let committer =
            self.committers
                .create(&self.options.committer, self.session.clone(), &self.options)?;
        let mut helper = TableSyncHelper::new(self.tables.clone(), self.options.clone(), committer);

        tracing::info!(
            committer = %self.options.committer,
            syncer = %self.options.syncer,
            right_table = %self.tables.right,
            "table sync started"
        );

        let outcome = helper.begin().and_then(|()| {
            for diff in differences {
                helper.record_difference(diff.kind());
                for printer in &mut self.printers {
                    printer.report_difference(&self.tables.left, &diff);
                }
                syncer.sync_difference(&mut helper, &diff)?;
            }
            Ok(())
        });

        if let Err(err) = outcome {
            tracing::warn!(error = %err, "table sync failed");
            if let Err(finalize_err) = helper.finalize(false) {
                tracing::warn!(error = %finalize_err, "finalize after failure failed");
            }
            return Err(err);
        }

        helper.finalize(true)?;
        let stats = helper.into_stats();
        tracing::info!(
            differences = stats.differences(),
            mutations = stats.mutations(),
            commit_windows = stats.commit_windows,
            "table sync finished"
        );
        Ok(stats)
    }
}
