//! SoftKey engine - soft foreign key inference
//!
//! This crate implements the matching algorithm:
//! - Value-overlap scoring against a threshold
//! - Per-stage scan over every table pair, sequential or bounded-concurrent
//! - Resumable progress ledger
//! - Staged runs from coarse row limits to full scans
//! - Pairwise comparison of two tables across databases

pub mod ledger;
pub mod observer;
pub mod pair;
pub mod scan;
pub mod scorer;
pub mod stages;

pub use ledger::{
    FileLedgerStore, LedgerDocument, LedgerError, LedgerKey, LedgerStore, MemoryLedgerStore,
    ProgressLedger,
};
pub use observer::{NoopObserver, ScanObserver, TracingObserver};
pub use pair::{PairCriterion, PairMatch, PairOutcome, TableRef};
pub use scan::{CancelFlag, ScanError, Scanner, StageOutcome};
pub use scorer::{is_match, score, EPSILON};
pub use stages::{StageRunError, StagedOutcome};
