//! SoftKey Core
//!
//! Domain model shared by every SoftKey crate: column descriptors and sampled
//! value sets, match results, configuration and the versioned scan report.

pub mod schema;
pub mod matches;
pub mod report;
pub mod config;

pub use schema::{ColumnDescriptor, RowLimit, Value, ValueSet};
pub use matches::{CandidateMatches, MatchCandidate, MatchMap};
pub use report::{ScanReport, ReportSummary, ReportVersion, StageRecord};
pub use config::{Config, ConfigError, ConnectionConfig, LedgerScope, ScanConfig, TableFilter};
