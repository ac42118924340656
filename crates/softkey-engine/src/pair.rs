//! Pairwise comparison of two named tables, possibly in different databases
//!
//! Unlike a stage, a pairwise comparison looks at exactly one table on each
//! side, samples both sides with the same row limit and keeps no ledger. A
//! pair of columns qualifies either by an absolute number of shared values or
//! by the overlap ratio used for staged scans.

use crate::scan::{ScanError, Scanner};
use crate::scorer::score;
use serde::{Deserialize, Serialize};
use softkey_catalog::{ConnectionError, DatabaseAdapter, SamplingError};
use softkey_core::{ColumnDescriptor, ConnectionConfig, RowLimit, ValueSet};
use std::collections::HashMap;

/// When a column pair counts as a soft key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairCriterion {
    /// At least this many distinct values in common
    CommonValues(usize),

    /// `|L ∩ R| / |L|` at or above this ratio
    Ratio(f64),
}

impl PairCriterion {
    /// Shared-value floor used when none is given
    pub const DEFAULT_COMMON_VALUES: usize = 5;

    pub fn accepts(&self, common_values: usize, ratio: f64) -> bool {
        match *self {
            Self::CommonValues(min) => common_values >= min,
            Self::Ratio(threshold) => crate::scorer::is_match(ratio, threshold),
        }
    }
}

impl Default for PairCriterion {
    fn default() -> Self {
        Self::CommonValues(Self::DEFAULT_COMMON_VALUES)
    }
}

impl std::fmt::Display for PairCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommonValues(n) => write!(f, ">= {} common values", n),
            Self::Ratio(t) => write!(f, "overlap ratio >= {}", t),
        }
    }
}

/// One side of a pairwise comparison
#[derive(Debug, Clone, Copy)]
pub struct TableRef<'a> {
    pub connection: &'a ConnectionConfig,
    pub table: &'a str,
}

impl<'a> TableRef<'a> {
    pub fn new(connection: &'a ConnectionConfig, table: &'a str) -> Self {
        Self { connection, table }
    }

    fn label(&self) -> String {
        format!("{}.{}", self.connection.identity(), self.table)
    }
}

/// A qualifying column pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMatch {
    pub left_column: String,
    pub right_column: String,
    pub declared_type: String,
    pub common_values: usize,
    pub ratio: f64,
}

/// Result of comparing two tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOutcome {
    /// `{host}_{database}.{table}`
    pub left: String,
    pub right: String,
    pub criterion: PairCriterion,
    pub row_limit: RowLimit,

    /// Column pairs compared, qualifying or not
    pub compared: usize,

    /// In left column order, then right column order
    pub matches: Vec<PairMatch>,
}

impl PairOutcome {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Scanner {
    /// Compare every same-typed column pair of `left` and `right`
    ///
    /// Both connections are opened up front. A table that cannot be described
    /// ends the comparison; a column that cannot be sampled matches nothing.
    pub async fn compare_tables(
        &self,
        left: TableRef<'_>,
        right: TableRef<'_>,
        criterion: PairCriterion,
        limit: RowLimit,
    ) -> Result<PairOutcome, ScanError> {
        tracing::info!(left = %left.label(), right = %right.label(), %criterion, %limit, "comparing tables");

        let (left_adapter, right_adapter) = tokio::try_join!(
            self.connector().connect(left.connection),
            self.connector().connect(right.connection),
        )
        .map_err(|e| {
            self.observer().connection_failed(&e.reason);
            ScanError::Connection(e)
        })?;

        let (left_columns, right_columns) = tokio::try_join!(
            describe(left_adapter.as_ref(), left.table),
            describe(right_adapter.as_ref(), right.table),
        )?;

        let mut left_samples = Samples::new(left_adapter.as_ref(), limit);
        let mut right_samples = Samples::new(right_adapter.as_ref(), limit);
        let mut matches = Vec::new();
        let mut compared = 0;

        for l in &left_columns {
            for r in right_columns.iter().filter(|r| r.same_type_as(l)) {
                compared += 1;

                let Some(left_values) = left_samples.get(l).await? else {
                    continue;
                };
                let Some(right_values) = right_samples.get(r).await? else {
                    continue;
                };

                let common_values = left_values.intersection_len(right_values);
                let ratio = score(left_values, right_values);
                tracing::debug!(left = %l, right = %r, common_values, ratio, "scored pair");

                if criterion.accepts(common_values, ratio) {
                    matches.push(PairMatch {
                        left_column: l.name.clone(),
                        right_column: r.name.clone(),
                        declared_type: l.declared_type.clone(),
                        common_values,
                        ratio,
                    });
                }
            }
        }

        tracing::info!(compared, matched = matches.len(), "pair comparison finished");

        Ok(PairOutcome {
            left: left.label(),
            right: right.label(),
            criterion,
            row_limit: limit,
            compared,
            matches,
        })
    }
}

async fn describe(adapter: &dyn DatabaseAdapter, table: &str) -> Result<Vec<ColumnDescriptor>, ScanError> {
    adapter.describe_columns(table).await.map_err(|source| match source.connection_lost() {
        Some(lost) => lost_connection(lost.clone()),
        None => ScanError::TableSchema {
            table: table.to_string(),
            source,
        },
    })
}

/// Distinct values per column, sampled at most once
struct Samples<'a> {
    adapter: &'a dyn DatabaseAdapter,
    limit: RowLimit,

    /// `None` records a column that could not be sampled
    cache: HashMap<String, Option<ValueSet>>,
}

impl<'a> Samples<'a> {
    fn new(adapter: &'a dyn DatabaseAdapter, limit: RowLimit) -> Self {
        Self {
            adapter,
            limit,
            cache: HashMap::new(),
        }
    }

    async fn get(&mut self, column: &ColumnDescriptor) -> Result<Option<&ValueSet>, ScanError> {
        if !self.cache.contains_key(&column.name) {
            let sampled = match self.adapter.distinct_values(column, self.limit).await {
                Ok(values) => Some(values),
                Err(SamplingError::ConnectionLost(lost)) => return Err(lost_connection(lost)),
                Err(e) => {
                    tracing::warn!(column = %column, error = %e, "cannot sample column");
                    None
                }
            };
            self.cache.insert(column.name.clone(), sampled);
        }
        Ok(self.cache.get(&column.name).and_then(Option::as_ref))
    }
}

fn lost_connection(source: ConnectionError) -> ScanError {
    ScanError::ConnectionLost {
        checkpointed: 0,
        source,
    }
}
