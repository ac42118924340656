//! Scan orchestrator: one sampling stage over every table pair
//!
//! For each source table the orchestrator samples every source column in full,
//! samples every same-typed column of every other table with the stage's row
//! limit, and keeps the candidate columns whose overlap ratio meets the
//! threshold. Each finished table is checkpointed in the progress ledger
//! before the next result is consumed.
//!
//! Schema and sampling errors are absorbed per table and per column. Connection,
//! table listing and ledger errors end the stage, as does a connection lost
//! mid-stage: tables in flight at that point are not checkpointed.

use crate::ledger::{LedgerError, LedgerKey, LedgerStore, ProgressLedger};
use crate::observer::{NoopObserver, ScanObserver};
use crate::scorer::{is_match, score};
use futures::stream::{self, StreamExt};
use softkey_catalog::{ConnectionError, Connector, DatabaseAdapter, SamplingError, SchemaAccessError};
use softkey_core::{
    CandidateMatches, ColumnDescriptor, ConnectionConfig, LedgerScope, MatchCandidate, MatchMap,
    RowLimit, ScanConfig, StageRecord, TableFilter,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::RuntimeFlavor;

/// Errors that end a stage
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Failed to list tables: {0}")]
    TableListing(#[source] SchemaAccessError),

    #[error("Failed to describe table '{table}': {source}")]
    TableSchema {
        table: String,
        #[source]
        source: SchemaAccessError,
    },

    #[error("Failed to load progress ledger: {0}")]
    LedgerLoad(#[source] LedgerError),

    #[error("Failed to checkpoint table '{table}' ({checkpointed} tables checkpointed): {source}")]
    Ledger {
        table: String,
        checkpointed: usize,
        #[source]
        source: LedgerError,
    },

    #[error("Connection lost mid-stage ({checkpointed} tables checkpointed): {source}")]
    ConnectionLost {
        checkpointed: usize,
        #[source]
        source: ConnectionError,
    },

    #[error("Scan cancelled ({checkpointed} tables checkpointed)")]
    Cancelled { checkpointed: usize },
}

impl ScanError {
    /// Tables durably checkpointed under the stage's key when the error occurred
    pub fn checkpointed(&self) -> Option<usize> {
        match self {
            Self::Ledger { checkpointed, .. }
            | Self::ConnectionLost { checkpointed, .. }
            | Self::Cancelled { checkpointed } => Some(*checkpointed),
            _ => None,
        }
    }
}

/// Cooperative cancellation shared between the caller and running scans
///
/// Checked before each source table starts; tables already running finish and
/// are checkpointed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one stage
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Ledger key the stage checkpointed under
    pub key: LedgerKey,

    /// Source table -> candidate table -> columns, resumed tables included
    pub matches: MatchMap,

    /// Column-level detail for the tables computed in this run
    pub candidates: Vec<MatchCandidate>,

    pub record: StageRecord,
}

/// A table and its columns as described for this stage
#[derive(Debug, Clone)]
struct TableColumns {
    name: String,
    columns: Vec<ColumnDescriptor>,
}

/// Contribution of one source table
struct TableOutcome {
    table: String,
    matches: CandidateMatches,
    candidates: Vec<MatchCandidate>,
}

/// Soft foreign key scanner
///
/// ## Usage
///
/// ```rust,ignore
/// let scanner = Scanner::new(Arc::new(PostgresConnector))
///     .with_observer(Arc::new(TracingObserver))
///     .with_concurrency(4);
///
/// let store = FileLedgerStore::new("progress.json");
/// let outcome = scanner
///     .identify_for_stage(&connection, 0.1, RowLimit::Limited(10), &store)
///     .await?;
/// ```
pub struct Scanner {
    connector: Arc<dyn Connector>,
    observer: Arc<dyn ScanObserver>,

    /// Source tables processed at once
    concurrency: usize,

    cancel: CancelFlag,
    filter: TableFilter,
    ledger_scope: LedgerScope,
}

impl Scanner {
    /// Sequential scanner with per-stage ledger keys and no observer
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            observer: Arc::new(NoopObserver),
            concurrency: 1,
            cancel: CancelFlag::new(),
            filter: TableFilter::default(),
            ledger_scope: LedgerScope::default(),
        }
    }

    /// Scanner tuned by the `[scan]` section of the config file
    pub fn from_config(connector: Arc<dyn Connector>, scan: &ScanConfig) -> Self {
        Self::new(connector)
            .with_concurrency(scan.concurrency)
            .with_table_filter(scan.exclude_tables.clone())
            .with_ledger_scope(scan.ledger_scope)
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Process up to `concurrency` source tables at once (at least one)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_table_filter(mut self, filter: TableFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_ledger_scope(mut self, scope: LedgerScope) -> Self {
        self.ledger_scope = scope;
        self
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub(crate) fn observer(&self) -> &dyn ScanObserver {
        self.observer.as_ref()
    }

    /// Flag that stops this scanner between tables
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn ledger_scope(&self) -> LedgerScope {
        self.ledger_scope
    }

    /// Key a stage with row limit `limit` checkpoints under
    pub fn ledger_key(&self, config: &ConnectionConfig, limit: RowLimit) -> LedgerKey {
        LedgerKey::for_stage(config, self.ledger_scope, limit)
    }

    /// Run one stage with candidate row limit `limit`
    pub async fn identify_for_stage(
        &self,
        config: &ConnectionConfig,
        threshold: f64,
        limit: RowLimit,
        store: &dyn LedgerStore,
    ) -> Result<StageOutcome, ScanError> {
        let key = self.ledger_key(config, limit);
        self.observer.stage_started(limit);
        tracing::info!(%key, %limit, threshold, "starting stage");

        let adapter = match self.connector.connect(config).await {
            Ok(adapter) => adapter,
            Err(e) => {
                self.observer.connection_failed(&e.reason);
                return Err(ScanError::Connection(e));
            }
        };

        let mut ledger = ProgressLedger::load(store).map_err(ScanError::LedgerLoad)?;

        let tables: Vec<String> = adapter
            .list_tables()
            .await
            .map_err(|e| match e.connection_lost() {
                Some(lost) => ScanError::ConnectionLost {
                    checkpointed: ledger.completed_count(&key),
                    source: lost.clone(),
                },
                None => ScanError::TableListing(e),
            })?
            .into_iter()
            .filter(|table| {
                let excluded = self.filter.is_excluded(table);
                if excluded {
                    tracing::debug!(table = %table, "excluded by filter");
                }
                !excluded
            })
            .collect();

        let (catalog, tables_failed) = match self.describe_tables(adapter.as_ref(), &tables).await {
            Ok(described) => described,
            Err(source) => {
                self.observer.connection_failed(&source.reason);
                return Err(ScanError::ConnectionLost {
                    checkpointed: ledger.completed_count(&key),
                    source,
                });
            }
        };
        let catalog = Arc::new(catalog);
        let total = catalog.len();

        let mut matches = MatchMap::new();
        let mut candidates = Vec::new();
        let mut pending = Vec::new();
        let mut resumed = 0;

        for (index, table) in catalog.iter().enumerate() {
            match ledger.recorded_matches(&key, &table.name) {
                Some(recorded) => {
                    self.observer.table_skipped(&table.name);
                    matches.insert(table.name.clone(), recorded);
                    resumed += 1;
                }
                None => pending.push(index),
            }
        }

        let mut processed = 0;
        let mut matched = matches.len();
        let cancel = &self.cancel;

        let mut results = stream::iter(pending)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|index| {
                let adapter = Arc::clone(&adapter);
                let catalog = Arc::clone(&catalog);
                self.observer.table_started(&catalog[index].name);
                async move { process_table(adapter.as_ref(), &catalog, index, limit, threshold).await }
            })
            .buffer_unordered(self.concurrency);

        while let Some(result) = results.next().await {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(source) => {
                    let checkpointed = ledger.completed_count(&key);
                    tracing::error!(%key, checkpointed, error = %source, "connection lost");
                    self.observer.connection_failed(&source.reason);
                    return Err(ScanError::ConnectionLost { checkpointed, source });
                }
            };

            let checkpoint =
                blocking_write(|| ledger.mark_complete(&key, &outcome.table, &outcome.matches));
            if let Err(source) = checkpoint {
                tracing::error!(table = %outcome.table, error = %source, "checkpoint failed");
                return Err(ScanError::Ledger {
                    table: outcome.table,
                    checkpointed: ledger.completed_count(&key),
                    source,
                });
            }

            processed += 1;
            if !outcome.matches.is_empty() {
                matched += 1;
            }
            self.observer
                .table_finished(&outcome.table, resumed + processed, total);

            matches.insert(outcome.table, outcome.matches);
            candidates.extend(outcome.candidates);
        }

        if resumed + processed < total {
            let checkpointed = ledger.completed_count(&key);
            tracing::warn!(%key, checkpointed, "stage cancelled");
            return Err(ScanError::Cancelled { checkpointed });
        }

        candidates.sort_by(|a, b| {
            (&a.source_table, &a.source_column, &a.candidate_table, &a.candidate_column).cmp(&(
                &b.source_table,
                &b.source_column,
                &b.candidate_table,
                &b.candidate_column,
            ))
        });

        tracing::info!(
            %key,
            processed,
            resumed,
            failed = tables_failed.len(),
            matched,
            "stage finished"
        );

        Ok(StageOutcome {
            key,
            matches,
            candidates,
            record: StageRecord {
                row_limit: limit,
                tables_processed: processed,
                tables_resumed: resumed,
                tables_failed,
                tables_matched: matched,
            },
        })
    }

    /// Describe every table once, in listing order
    ///
    /// Tables that cannot be described are left out as sources and candidates.
    /// A lost connection fails the whole call.
    async fn describe_tables(
        &self,
        adapter: &dyn DatabaseAdapter,
        tables: &[String],
    ) -> Result<(Vec<TableColumns>, Vec<String>), ConnectionError> {
        let described: Vec<_> = stream::iter(tables)
            .map(|table| async move { (table, adapter.describe_columns(table).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut catalog = Vec::with_capacity(described.len());
        let mut failed = Vec::new();
        for (table, result) in described {
            match result {
                Ok(columns) => catalog.push(TableColumns {
                    name: table.clone(),
                    columns,
                }),
                Err(e) => {
                    if let Some(lost) = e.connection_lost() {
                        return Err(lost.clone());
                    }
                    tracing::warn!(table = %table, error = %e, "skipping table");
                    self.observer.table_failed(table, &e.to_string());
                    failed.push(table.clone());
                }
            }
        }
        Ok((catalog, failed))
    }
}

/// Run a blocking ledger write
///
/// On a multi-threaded runtime the worker thread hands its other tasks off
/// first; elsewhere the write runs inline.
fn blocking_write<T>(write: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(write)
        }
        _ => write(),
    }
}

/// Compare every column of `catalog[index]` against every other table
///
/// Only a lost connection is an error; other sampling failures mean no match.
async fn process_table(
    adapter: &dyn DatabaseAdapter,
    catalog: &[TableColumns],
    index: usize,
    limit: RowLimit,
    threshold: f64,
) -> Result<TableOutcome, ConnectionError> {
    let source = &catalog[index];
    let mut matches = CandidateMatches::new();
    let mut candidates = Vec::new();

    for source_column in &source.columns {
        let targets: Vec<&ColumnDescriptor> = catalog
            .iter()
            .filter(|t| t.name != source.name)
            .flat_map(|t| t.columns.iter())
            .filter(|c| c.same_type_as(source_column))
            .collect();

        if targets.is_empty() {
            tracing::debug!(column = %source_column, "no same-typed candidates");
            continue;
        }

        let source_values = match adapter.distinct_values(source_column, RowLimit::Unbounded).await {
            Ok(values) => values,
            Err(SamplingError::ConnectionLost(lost)) => return Err(lost),
            Err(e) => {
                tracing::warn!(column = %source_column, error = %e, "cannot sample source column");
                continue;
            }
        };

        for target in targets {
            let target_values = match adapter.distinct_values(target, limit).await {
                Ok(values) => values,
                Err(SamplingError::ConnectionLost(lost)) => return Err(lost),
                Err(e) => {
                    tracing::warn!(column = %target, error = %e, "cannot sample candidate column");
                    continue;
                }
            };

            let ratio = score(&source_values, &target_values);
            tracing::debug!(source = %source_column, candidate = %target, ratio, "scored");

            if is_match(ratio, threshold) {
                matches.record(&target.table, &target.name);
                candidates.push(MatchCandidate {
                    source_table: source.name.clone(),
                    source_column: source_column.name.clone(),
                    candidate_table: target.table.clone(),
                    candidate_column: target.name.clone(),
                    declared_type: source_column.declared_type.clone(),
                    ratio,
                    row_limit: limit,
                });
            }
        }
    }

    Ok(TableOutcome {
        table: source.name.clone(),
        matches,
        candidates,
    })
}
