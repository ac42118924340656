//! Resumable progress ledger
//!
//! The ledger remembers which source tables have been fully processed under a
//! [`LedgerKey`], so an interrupted scan picks up where it stopped. Alongside
//! each completion flag it keeps the table's contribution to the match map,
//! which lets a resumed stage return the same map as an uninterrupted one.
//!
//! ## File layout
//!
//! `FileLedgerStore::new("progress.json")` writes two files:
//!
//! ```text
//! progress.json          { "<key>": { "<table>": true, ... }, ... }
//! progress.matches.json  { "<key>": { "<table>": { "<candidate table>": ["col", ...] } } }
//! ```
//!
//! The matches file is written before the progress file, each through a
//! temporary file that is synced to disk and then renamed. A crash between the two writes leaves the
//! table not complete, so it is redone on the next run.

use softkey_core::{CandidateMatches, ConnectionConfig, LedgerScope, RowLimit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Identity under which progress is recorded
///
/// `"{host}_{database}"`, suffixed with `#limit=N` or `#unbounded` when
/// progress is scoped per stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerKey(String);

impl LedgerKey {
    /// Key shared by every stage of a connection
    pub fn for_connection(config: &ConnectionConfig) -> Self {
        Self(config.identity())
    }

    /// Key for one stage under `scope`
    pub fn for_stage(config: &ConnectionConfig, scope: LedgerScope, limit: RowLimit) -> Self {
        match (scope, limit) {
            (LedgerScope::Connection, _) => Self::for_connection(config),
            (LedgerScope::Stage, RowLimit::Limited(n)) => Self(format!("{}#limit={}", config.identity(), n)),
            (LedgerScope::Stage, RowLimit::Unbounded) => Self(format!("{}#unbounded", config.identity())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key records progress for `config`, in any scope
    pub fn belongs_to(&self, config: &ConnectionConfig) -> bool {
        let identity = config.identity();
        match self.0.strip_prefix(identity.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('#'),
            None => false,
        }
    }
}

impl From<&str> for LedgerKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl std::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a [`LedgerStore`] persists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerDocument {
    /// key -> table -> complete
    pub progress: BTreeMap<LedgerKey, BTreeMap<String, bool>>,

    /// key -> source table -> recorded contribution
    pub matches: BTreeMap<LedgerKey, BTreeMap<String, CandidateMatches>>,
}

/// Ledger persistence failures; always fatal for the stage
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Ledger storage unavailable: {0}")]
    Unavailable(String),
}

/// Where the ledger lives
pub trait LedgerStore: Send + Sync {
    /// Read the whole ledger; a ledger that was never written is empty
    fn load(&self) -> Result<LedgerDocument, LedgerError>;

    /// Durably replace the whole ledger
    fn save(&self, document: &LedgerDocument) -> Result<(), LedgerError>;

    /// Human-readable location, for messages
    fn describe(&self) -> String;
}

/// JSON files on disk
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    progress_path: PathBuf,
    matches_path: PathBuf,
}

impl FileLedgerStore {
    /// Store progress at `path` and contributions next to it
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let progress_path = path.into();
        let stem = progress_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "progress".to_string());
        let matches_path = progress_path.with_file_name(format!("{}.matches.json", stem));

        Self {
            progress_path,
            matches_path,
        }
    }

    pub fn progress_path(&self) -> &Path {
        &self.progress_path
    }

    pub fn matches_path(&self) -> &Path {
        &self.matches_path
    }
}

fn read_json<T>(path: &Path) -> Result<Option<T>, LedgerError>
where
    T: for<'de> Deserialize<'de>,
{
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LedgerError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| LedgerError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `value` to a sibling temp file, flush it to disk, then rename it over `path`
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), LedgerError> {
    use std::io::Write as _;

    let json = serde_json::to_string_pretty(value)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let write_err = |source: std::io::Error| LedgerError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::create(&tmp_path).map_err(write_err)?;
    file.write_all(json.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(write_err)
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> Result<LedgerDocument, LedgerError> {
        let progress = read_json(&self.progress_path)?.unwrap_or_default();
        let matches = read_json(&self.matches_path)?.unwrap_or_default();
        Ok(LedgerDocument { progress, matches })
    }

    fn save(&self, document: &LedgerDocument) -> Result<(), LedgerError> {
        write_json_atomic(&self.matches_path, &document.matches)?;
        write_json_atomic(&self.progress_path, &document.progress)
    }

    fn describe(&self) -> String {
        self.progress_path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    document: LedgerDocument,
    saves: usize,

    /// Saves allowed before every further save fails
    fail_after: Option<usize>,
}

/// In-memory store for tests
///
/// Clones share state, so a test can keep a handle to inspect what was saved
/// or to make later saves fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document
    pub fn with_document(document: LedgerDocument) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.document = document;
        }
        store
    }

    /// Let `n` more saves succeed, then fail every save
    pub fn fail_after(&self, n: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_after = Some(state.saves + n);
        }
    }

    /// Fail every save from now on
    pub fn fail_saves(&self) {
        self.fail_after(0);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.state.lock().map(|s| s.saves).unwrap_or_default()
    }

    /// Last saved document
    pub fn document(&self) -> LedgerDocument {
        self.state
            .lock()
            .map(|s| s.document.clone())
            .unwrap_or_default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<LedgerDocument, LedgerError> {
        self.state
            .lock()
            .map(|s| s.document.clone())
            .map_err(|e| LedgerError::Unavailable(e.to_string()))
    }

    fn save(&self, document: &LedgerDocument) -> Result<(), LedgerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        if state.fail_after.is_some_and(|limit| state.saves >= limit) {
            return Err(LedgerError::Unavailable("simulated write failure".to_string()));
        }
        state.document = document.clone();
        state.saves += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Progress ledger over a [`LedgerStore`]
///
/// Loaded once at the start of a stage; every [`mark_complete`](Self::mark_complete)
/// rewrites the whole store before returning.
pub struct ProgressLedger<'a> {
    store: &'a dyn LedgerStore,
    document: LedgerDocument,
}

impl<'a> ProgressLedger<'a> {
    /// Load the ledger from `store`
    pub fn load(store: &'a dyn LedgerStore) -> Result<Self, LedgerError> {
        let document = store.load()?;
        Ok(Self { store, document })
    }

    pub fn is_complete(&self, key: &LedgerKey, table: &str) -> bool {
        self.document
            .progress
            .get(key)
            .and_then(|tables| tables.get(table))
            .copied()
            .unwrap_or(false)
    }

    /// Completion flags recorded under `key`
    pub fn entries(&self, key: &LedgerKey) -> BTreeMap<String, bool> {
        self.document.progress.get(key).cloned().unwrap_or_default()
    }

    /// Tables marked complete under `key`
    pub fn completed_count(&self, key: &LedgerKey) -> usize {
        self.document
            .progress
            .get(key)
            .map_or(0, |tables| tables.values().filter(|done| **done).count())
    }

    /// All keys with recorded progress
    pub fn keys(&self) -> impl Iterator<Item = &LedgerKey> {
        self.document.progress.keys()
    }

    /// Contribution recorded when `table` was completed under `key`
    ///
    /// `None` for tables that are not complete. A complete table without
    /// matches yields an empty contribution.
    pub fn recorded_matches(&self, key: &LedgerKey, table: &str) -> Option<CandidateMatches> {
        if !self.is_complete(key, table) {
            return None;
        }
        Some(
            self.document
                .matches
                .get(key)
                .and_then(|tables| tables.get(table))
                .cloned()
                .unwrap_or_default(),
        )
    }

    /// Record `contribution` for `table`, mark it complete and flush
    ///
    /// On failure the in-memory ledger is left as it was before the call.
    pub fn mark_complete(
        &mut self,
        key: &LedgerKey,
        table: &str,
        contribution: &CandidateMatches,
    ) -> Result<(), LedgerError> {
        let previous = self.document.clone();

        if contribution.is_empty() {
            // A contribution left by an earlier attempt must not be replayed
            if let Some(tables) = self.document.matches.get_mut(key) {
                tables.remove(table);
                if tables.is_empty() {
                    self.document.matches.remove(key);
                }
            }
        } else {
            self.document
                .matches
                .entry(key.clone())
                .or_default()
                .insert(table.to_string(), contribution.clone());
        }
        self.document
            .progress
            .entry(key.clone())
            .or_default()
            .insert(table.to_string(), true);

        if let Err(e) = self.store.save(&self.document) {
            self.document = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Forget everything recorded under `key`; returns how many tables were complete
    pub fn reset(&mut self, key: &LedgerKey) -> Result<usize, LedgerError> {
        let cleared = self.completed_count(key);
        let had_key = self.document.progress.remove(key).is_some();
        let had_matches = self.document.matches.remove(key).is_some();

        if had_key || had_matches {
            self.store.save(&self.document)?;
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("localhost", "shop", "root")
    }

    fn customers_match() -> CandidateMatches {
        let mut matches = CandidateMatches::new();
        matches.record("customers", "id");
        matches
    }

    #[test]
    fn test_key_formats() {
        let config = config();
        assert_eq!(LedgerKey::for_connection(&config).as_str(), "localhost_shop");
        assert_eq!(
            LedgerKey::for_stage(&config, LedgerScope::Stage, RowLimit::Limited(10)).as_str(),
            "localhost_shop#limit=10"
        );
        assert_eq!(
            LedgerKey::for_stage(&config, LedgerScope::Stage, RowLimit::Unbounded).as_str(),
            "localhost_shop#unbounded"
        );
        assert_eq!(
            LedgerKey::for_stage(&config, LedgerScope::Connection, RowLimit::Limited(10)).as_str(),
            "localhost_shop"
        );
    }

    #[test]
    fn test_key_belongs_to_connection() {
        let config = config();
        assert!(LedgerKey::from("localhost_shop").belongs_to(&config));
        assert!(LedgerKey::from("localhost_shop#limit=50").belongs_to(&config));
        assert!(!LedgerKey::from("localhost_shopfloor").belongs_to(&config));
        assert!(!LedgerKey::from("otherhost_shop").belongs_to(&config));
    }

    #[test]
    fn test_mark_complete_persists_immediately() {
        let store = MemoryLedgerStore::new();
        let key = LedgerKey::from("localhost_shop");
        let mut ledger = ProgressLedger::load(&store).unwrap();

        assert!(!ledger.is_complete(&key, "orders"));
        ledger.mark_complete(&key, "orders", &customers_match()).unwrap();
        ledger.mark_complete(&key, "customers", &CandidateMatches::new()).unwrap();

        assert_eq!(store.save_count(), 2);

        let reloaded = ProgressLedger::load(&store).unwrap();
        assert!(reloaded.is_complete(&key, "orders"));
        assert_eq!(reloaded.completed_count(&key), 2);
        assert_eq!(reloaded.recorded_matches(&key, "orders"), Some(customers_match()));
        assert_eq!(reloaded.recorded_matches(&key, "customers"), Some(CandidateMatches::new()));
        assert_eq!(reloaded.recorded_matches(&key, "products"), None);
    }

    #[test]
    fn test_empty_contribution_clears_earlier_one() {
        let key = LedgerKey::from("localhost_shop#unbounded");
        let mut document = LedgerDocument::default();
        document
            .matches
            .entry(key.clone())
            .or_default()
            .insert("orders".to_string(), customers_match());
        let store = MemoryLedgerStore::with_document(document);
        let mut ledger = ProgressLedger::load(&store).unwrap();

        ledger.mark_complete(&key, "orders", &CandidateMatches::new()).unwrap();

        assert_eq!(ledger.recorded_matches(&key, "orders"), Some(CandidateMatches::new()));
        assert!(store.document().matches.is_empty());
        assert!(store.document().progress[&key]["orders"]);
    }

    #[test]
    fn test_keys_do_not_interfere() {
        let store = MemoryLedgerStore::new();
        let a = LedgerKey::from("host_a");
        let b = LedgerKey::from("host_b");
        let mut ledger = ProgressLedger::load(&store).unwrap();

        ledger.mark_complete(&a, "orders", &CandidateMatches::new()).unwrap();

        assert!(ledger.is_complete(&a, "orders"));
        assert!(!ledger.is_complete(&b, "orders"));
        assert!(ledger.entries(&b).is_empty());
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let store = MemoryLedgerStore::new();
        let key = LedgerKey::from("localhost_shop");
        let mut ledger = ProgressLedger::load(&store).unwrap();

        ledger.mark_complete(&key, "a", &CandidateMatches::new()).unwrap();
        store.fail_saves();

        let result = ledger.mark_complete(&key, "b", &customers_match());
        assert!(matches!(result, Err(LedgerError::Unavailable(_))));
        assert!(!ledger.is_complete(&key, "b"));
        assert_eq!(ledger.completed_count(&key), 1);
        assert_eq!(store.document().progress[&key].len(), 1);
    }

    #[test]
    fn test_reset_clears_one_key() {
        let store = MemoryLedgerStore::new();
        let stage = LedgerKey::from("localhost_shop#limit=10");
        let other = LedgerKey::from("localhost_shop#unbounded");
        let mut ledger = ProgressLedger::load(&store).unwrap();

        ledger.mark_complete(&stage, "orders", &customers_match()).unwrap();
        ledger.mark_complete(&other, "orders", &customers_match()).unwrap();

        assert_eq!(ledger.reset(&stage).unwrap(), 1);
        assert!(!ledger.is_complete(&stage, "orders"));
        assert!(ledger.is_complete(&other, "orders"));
        assert_eq!(ledger.keys().count(), 1);

        // Nothing to clear, nothing written
        let saves = store.save_count();
        assert_eq!(ledger.reset(&stage).unwrap(), 0);
        assert_eq!(store.save_count(), saves);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("progress.json"));

        let document = store.load().unwrap();
        assert_eq!(document, LedgerDocument::default());
        assert_eq!(store.matches_path(), dir.path().join("progress.matches.json"));
    }

    #[test]
    fn test_file_store_round_trip_and_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("progress.json"));
        let key = LedgerKey::from("localhost_shop");

        let mut ledger = ProgressLedger::load(&store).unwrap();
        ledger.mark_complete(&key, "orders", &customers_match()).unwrap();

        let progress: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.progress_path()).unwrap()).unwrap();
        assert_eq!(progress, serde_json::json!({ "localhost_shop": { "orders": true } }));

        let matches: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.matches_path()).unwrap()).unwrap();
        assert_eq!(
            matches,
            serde_json::json!({ "localhost_shop": { "orders": { "customers": ["id"] } } })
        );

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_file_store_reads_legacy_progress_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"{"localhost_shop": {"orders": true, "customers": true}}"#).unwrap();

        let store = FileLedgerStore::new(&path);
        let ledger = ProgressLedger::load(&store).unwrap();
        let key = LedgerKey::from("localhost_shop");

        assert_eq!(ledger.completed_count(&key), 2);
        assert_eq!(ledger.recorded_matches(&key, "orders"), Some(CandidateMatches::new()));
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = FileLedgerStore::new(&path).load();
        assert!(matches!(result, Err(LedgerError::Corrupt { .. })));
    }

    #[test]
    fn test_file_store_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("missing").join("progress.json"));

        let mut ledger = ProgressLedger::load(&store).unwrap();
        let result = ledger.mark_complete(&LedgerKey::from("k"), "t", &CandidateMatches::new());
        assert!(matches!(result, Err(LedgerError::Write { .. })));
    }
}
