//! Configuration schema (softkey.toml)

use crate::schema::RowLimit;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables consulted, in order, when no password is configured
pub const PASSWORD_ENV_VARS: [&str; 2] = ["SOFTKEY_PASSWORD", "PGPASSWORD"];

/// Database connection settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database engine (currently only "postgres")
    #[serde(rename = "type", default = "default_engine")]
    pub engine: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub database: String,

    pub user: String,

    /// Password; when omitted it is read from the environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Namespace whose tables are scanned
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Connect over TLS
    #[serde(default)]
    pub tls: bool,
}

fn default_engine() -> String {
    "postgres".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

impl ConnectionConfig {
    /// Create a postgres connection config with default port and schema
    pub fn new(host: impl Into<String>, database: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            engine: default_engine(),
            host: host.into(),
            port: default_port(),
            database: database.into(),
            user: user.into(),
            password: None,
            schema: default_schema(),
            tls: false,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Identity used to scope checkpoint progress: `"{host}_{database}"`
    pub fn identity(&self) -> String {
        format!("{}_{}", self.host, self.database)
    }

    /// Configured password, falling back to [`PASSWORD_ENV_VARS`]
    pub fn resolve_password(&self) -> Option<String> {
        self.password.clone().or_else(|| {
            PASSWORD_ENV_VARS
                .iter()
                .find_map(|name| std::env::var(name).ok())
        })
    }
}

// Keep credentials out of logs
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("schema", &self.schema)
            .field("tls", &self.tls)
            .finish()
    }
}

/// How checkpoint progress is keyed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerScope {
    /// One key per connection: a table finished in any stage is skipped in
    /// every later stage
    Connection,

    /// One key per connection and row limit, so later stages refine earlier ones
    #[default]
    Stage,
}

/// Tables left out of a scan, as glob patterns (`*` wildcard)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableFilter {
    patterns: Vec<String>,
}

impl TableFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Check if a table matches any exclusion pattern
    pub fn is_excluded(&self, table: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, table)
            } else {
                pattern == table
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Scan tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Minimum overlap ratio for a candidate column to count as a match
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Row limits, run in order
    #[serde(default = "default_stages")]
    pub stages: Vec<RowLimit>,

    /// Checkpoint file
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,

    #[serde(default)]
    pub ledger_scope: LedgerScope,

    /// Source tables processed at once against one database
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub exclude_tables: TableFilter,
}

fn default_threshold() -> f64 {
    0.1
}

fn default_stages() -> Vec<RowLimit> {
    vec![RowLimit::Limited(10), RowLimit::Limited(50), RowLimit::Unbounded]
}

fn default_ledger() -> PathBuf {
    PathBuf::from("progress.json")
}

fn default_concurrency() -> usize {
    1
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            stages: default_stages(),
            ledger: default_ledger(),
            ledger_scope: LedgerScope::default(),
            concurrency: default_concurrency(),
            exclude_tables: TableFilter::default(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Database to scan
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    /// Directory relative paths (such as the ledger) resolve against
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Config {
    /// Create a config for a connection with default scan settings
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            scan: ScanConfig::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.project_root = std::env::current_dir().unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Reject settings no scan can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scan = &self.scan;
        if !(scan.threshold > 0.0 && scan.threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "scan.threshold must be in (0, 1], got {}",
                scan.threshold
            )));
        }
        if scan.stages.is_empty() {
            return Err(ConfigError::Invalid("scan.stages must not be empty".to_string()));
        }
        if scan.stages.contains(&RowLimit::Limited(0)) {
            return Err(ConfigError::Invalid("scan.stages row limits must be greater than zero".to_string()));
        }
        if scan.concurrency == 0 {
            return Err(ConfigError::Invalid("scan.concurrency must be at least 1".to_string()));
        }
        if self.connection.engine.to_lowercase() != "postgres" {
            return Err(ConfigError::Invalid(format!(
                "unsupported connection type '{}'; supported: postgres",
                self.connection.engine
            )));
        }
        Ok(())
    }

    /// Ledger path, resolved against the project root when relative
    pub fn ledger_path(&self) -> PathBuf {
        if self.scan.ledger.is_absolute() {
            self.scan.ledger.clone()
        } else {
            self.project_root.join(&self.scan.ledger)
        }
    }
}

/// Wildcard matching where `*` matches any run of characters
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = (parts[0], parts[parts.len() - 1]);

    if !text.starts_with(first) || text.len() < first.len() + last.len() || !text.ends_with(last) {
        return false;
    }

    let mut rest = &text[first.len()..text.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
