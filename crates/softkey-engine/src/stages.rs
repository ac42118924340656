//! Stage runner: coarse-to-fine sampling
//!
//! Stages run strictly in order against the same ledger store. Each stage's map
//! is merged into the running result per source table: a source table matched
//! in a later stage replaces whatever earlier stages found for it.

use crate::ledger::{LedgerKey, LedgerStore};
use crate::scan::{ScanError, Scanner};
use softkey_core::{ConnectionConfig, MatchCandidate, MatchMap, RowLimit, ScanReport, StageRecord};

/// Merged result of every stage
#[derive(Debug, Clone, Default)]
pub struct StagedOutcome {
    pub matches: MatchMap,

    /// Detail behind `matches`, following the same per-source-table overwrite
    pub candidates: Vec<MatchCandidate>,

    /// One record per completed stage, in run order
    pub stages: Vec<StageRecord>,
}

impl StagedOutcome {
    /// Build the versioned report for `connection`
    pub fn into_report(self, connection: &ConnectionConfig, threshold: f64) -> ScanReport {
        ScanReport::new(
            connection.identity(),
            threshold,
            self.stages,
            self.matches,
            self.candidates,
        )
    }
}

/// A stage failed; the run stopped there
#[derive(Debug, thiserror::Error)]
#[error("Stage {} (row limit {limit}, ledger key '{key}') failed: {source}", .index + 1)]
pub struct StageRunError {
    /// Zero-based position of the failed stage
    pub index: usize,

    pub limit: RowLimit,

    pub key: LedgerKey,

    #[source]
    pub source: ScanError,

    /// What the stages before the failed one produced
    pub completed: StagedOutcome,
}

impl StageRunError {
    /// Tables checkpointed under the failed stage's key
    pub fn checkpointed(&self) -> Option<usize> {
        self.source.checkpointed()
    }
}

impl Scanner {
    /// Run `stages` in order and merge their maps, last stage winning per source table
    pub async fn staged_identify(
        &self,
        config: &ConnectionConfig,
        stages: &[RowLimit],
        threshold: f64,
        store: &dyn LedgerStore,
    ) -> Result<StagedOutcome, StageRunError> {
        let mut merged = StagedOutcome::default();

        for (index, &limit) in stages.iter().enumerate() {
            tracing::info!(stage = index + 1, of = stages.len(), %limit, "running stage");

            let outcome = match self.identify_for_stage(config, threshold, limit, store).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    return Err(StageRunError {
                        index,
                        limit,
                        key: self.ledger_key(config, limit),
                        source,
                        completed: merged,
                    })
                }
            };

            merged
                .candidates
                .retain(|c| !outcome.matches.contains_table(&c.source_table));
            merged.candidates.extend(outcome.candidates);
            merged.matches.merge_overwrite(outcome.matches);
            merged.stages.push(outcome.record);
        }

        Ok(merged)
    }
}
