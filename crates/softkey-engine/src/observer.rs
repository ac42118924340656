//! Scan progress notifications
//!
//! The orchestrator reports what it is doing through a [`ScanObserver`]
//! instead of printing. Every method has a no-op default so observers only
//! implement what they display.

use softkey_core::RowLimit;

/// Receives scan progress events
///
/// Calls come from the single consumer loop of a stage, never concurrently.
pub trait ScanObserver: Send + Sync {
    /// A stage with candidate row limit `limit` is starting
    fn stage_started(&self, _limit: RowLimit) {}

    /// `table` was already complete in the ledger
    fn table_skipped(&self, _table: &str) {}

    /// `table` is about to be processed as a source
    fn table_started(&self, _table: &str) {}

    /// `table` could not be described and is left out of this stage
    fn table_failed(&self, _table: &str, _reason: &str) {}

    /// `table` is done; `done` of `total` source tables are accounted for
    fn table_finished(&self, _table: &str, _done: usize, _total: usize) {}

    /// The stage could not connect
    fn connection_failed(&self, _reason: &str) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ScanObserver for TracingObserver {
    fn stage_started(&self, limit: RowLimit) {
        tracing::info!(%limit, "stage started");
    }

    fn table_skipped(&self, table: &str) {
        tracing::info!(table, "skipping, already done");
    }

    fn table_started(&self, table: &str) {
        tracing::info!(table, "processing table");
    }

    fn table_failed(&self, table: &str, reason: &str) {
        tracing::warn!(table, reason, "table skipped");
    }

    fn table_finished(&self, table: &str, done: usize, total: usize) {
        tracing::debug!(table, done, total, "table finished");
    }

    fn connection_failed(&self, reason: &str) {
        tracing::error!(reason, "connection failed");
    }
}
