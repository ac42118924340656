//! Scan report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::matches::{MatchCandidate, MatchMap};
use crate::schema::RowLimit;
use serde::{Deserialize, Serialize};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What one stage did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub row_limit: RowLimit,

    /// Source tables scanned in this run
    pub tables_processed: usize,

    /// Source tables skipped because the ledger had them
    pub tables_resumed: usize,

    /// Tables skipped because their metadata could not be read
    pub tables_failed: Vec<String>,

    /// Source tables with at least one match in this stage
    pub tables_matched: usize,
}

/// Summary statistics for a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Source tables with at least one inferred key
    pub source_tables: usize,

    /// (source table, candidate table, column) links
    pub links: usize,

    /// Stages executed
    pub stages: usize,
}

/// Scan report (report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// `"{host}_{database}"` of the scanned connection
    pub connection: String,

    pub threshold: f64,

    pub summary: ReportSummary,

    pub stages: Vec<StageRecord>,

    /// Merged soft foreign keys
    pub matches: MatchMap,

    /// Column-level detail behind `matches`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<MatchCandidate>,
}

impl ScanReport {
    /// Build a report from a finished scan
    pub fn new(
        connection: impl Into<String>,
        threshold: f64,
        stages: Vec<StageRecord>,
        matches: MatchMap,
        candidates: Vec<MatchCandidate>,
    ) -> Self {
        let summary = ReportSummary {
            source_tables: matches.len(),
            links: matches.link_count(),
            stages: stages.len(),
        };

        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            connection: connection.into(),
            threshold,
            summary,
            stages,
            matches,
            candidates,
        }
    }

    /// Candidates for one source table
    pub fn candidates_for<'a>(&'a self, source_table: &'a str) -> impl Iterator<Item = &'a MatchCandidate> {
        self.candidates
            .iter()
            .filter(move |c| c.source_table == source_table)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// Render as markdown
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Soft Foreign Key Report\n\n");
        md.push_str(&format!("**Version:** {}\n\n", self.version));
        md.push_str(&format!("**Timestamp:** {}\n\n", self.timestamp));
        md.push_str(&format!("**Connection:** `{}`\n\n", self.connection));
        md.push_str(&format!("**Threshold:** {}\n\n", self.threshold));

        md.push_str("## Stages\n\n");
        md.push_str("| Row limit | Processed | Resumed | Matched | Failed |\n");
        md.push_str("|-----------|-----------|---------|---------|--------|\n");
        for stage in &self.stages {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                stage.row_limit,
                stage.tables_processed,
                stage.tables_resumed,
                stage.tables_matched,
                stage.tables_failed.len()
            ));
        }
        md.push('\n');

        if self.matches.is_empty() {
            md.push_str("No soft foreign keys found.\n");
            return md;
        }

        md.push_str(&format!(
            "## Matches ({} source tables, {} links)\n\n",
            self.summary.source_tables, self.summary.links
        ));

        for (source, candidates) in self.matches.iter() {
            md.push_str(&format!("### {}\n\n", source));
            for (table, columns) in candidates.iter() {
                md.push_str(&format!("- **{}**: {}\n", table, columns.join(", ")));
            }
            for candidate in self.candidates_for(source) {
                md.push_str(&format!(
                    "  - `{}` ({:.1}% overlap, limit {})\n",
                    candidate.describe(),
                    candidate.ratio * 100.0,
                    candidate.row_limit
                ));
            }
            md.push('\n');
        }

        md
    }
}
