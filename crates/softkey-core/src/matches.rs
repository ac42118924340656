//! Match results
//!
//! A [`MatchMap`] has the shape `source table -> candidate table -> [candidate columns]`
//! and is what every scan returns. [`MatchCandidate`] keeps the per-column detail
//! (which source column matched and with what ratio) for reporting.

use crate::schema::RowLimit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One scored column pair that met the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub source_table: String,
    pub source_column: String,
    pub candidate_table: String,
    pub candidate_column: String,

    /// Declared type shared by both columns
    pub declared_type: String,

    /// `|source ∩ candidate| / |source|`
    pub ratio: f64,

    /// Row limit the candidate column was sampled with
    pub row_limit: RowLimit,
}

impl MatchCandidate {
    /// `source.col -> candidate.col`
    pub fn describe(&self) -> String {
        format!(
            "{}.{} -> {}.{}",
            self.source_table, self.source_column, self.candidate_table, self.candidate_column
        )
    }
}

/// Candidate tables and columns found for a single source table
///
/// Columns keep the order in which they first matched and never repeat, even
/// when several source columns point at the same candidate column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateMatches {
    tables: BTreeMap<String, Vec<String>>,
}

impl CandidateMatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `candidate_table.candidate_column` matched
    pub fn record(&mut self, candidate_table: impl Into<String>, candidate_column: impl Into<String>) {
        let columns = self.tables.entry(candidate_table.into()).or_default();
        let column = candidate_column.into();
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    /// Matched columns of one candidate table
    pub fn columns(&self, candidate_table: &str) -> Option<&[String]> {
        self.tables.get(candidate_table).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of candidate tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Number of (candidate table, column) links
    pub fn link_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.tables.iter()
    }
}

impl<T, C> FromIterator<(T, Vec<C>)> for CandidateMatches
where
    T: Into<String>,
    C: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (T, Vec<C>)>>(iter: I) -> Self {
        let mut matches = Self::new();
        for (table, columns) in iter {
            let table = table.into();
            for column in columns {
                matches.record(table.clone(), column);
            }
        }
        matches
    }
}

/// Inferred soft foreign keys for a whole database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchMap {
    tables: BTreeMap<String, CandidateMatches>,
}

impl MatchMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the matches of one source table
    ///
    /// Replaces whatever was recorded before. Empty contributions are not stored,
    /// so a source table without matches has no entry.
    pub fn insert(&mut self, source_table: impl Into<String>, matches: CandidateMatches) {
        let source_table = source_table.into();
        if matches.is_empty() {
            self.tables.remove(&source_table);
        } else {
            self.tables.insert(source_table, matches);
        }
    }

    pub fn get(&self, source_table: &str) -> Option<&CandidateMatches> {
        self.tables.get(source_table)
    }

    /// Matched columns for `source_table -> candidate_table`
    pub fn columns(&self, source_table: &str, candidate_table: &str) -> Option<&[String]> {
        self.get(source_table).and_then(|m| m.columns(candidate_table))
    }

    pub fn contains_table(&self, source_table: &str) -> bool {
        self.tables.contains_key(source_table)
    }

    /// Merge a later stage into this map
    ///
    /// Each source table present in `later` replaces this map's entry entirely;
    /// entries for other source tables are kept.
    pub fn merge_overwrite(&mut self, later: MatchMap) {
        for (source_table, matches) in later.tables {
            self.tables.insert(source_table, matches);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of source tables with at least one match
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Total (source table, candidate table, column) links
    pub fn link_count(&self) -> usize {
        self.tables.values().map(CandidateMatches::link_count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CandidateMatches)> {
        self.tables.iter()
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
