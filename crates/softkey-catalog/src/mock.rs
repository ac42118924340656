//! Mock database adapter for testing
//!
//! This adapter keeps tables in memory and answers schema and sampling calls
//! without connecting to any database. It's useful for:
//! - Unit testing the scan algorithm
//! - Simulating per-table and per-column failures
//! - Demos without real credentials
//!
//! ## Usage
//!
//! ```rust,ignore
//! use softkey_catalog::{MockAdapterBuilder, MockTable};
//!
//! let adapter = MockAdapterBuilder::new()
//!     .with_table(MockTable::new("customers").column("id", "integer", [1, 2, 3, 4]))
//!     .with_table(MockTable::new("orders").column("customer_id", "integer", [1, 2, 3]))
//!     .build();
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Metadata for one table cannot be read
//! let adapter = MockAdapterBuilder::new()
//!     .with_schema_error("restricted", SchemaAccessError::PermissionDenied("restricted".into()))
//!     .build();
//!
//! // Connector refuses to connect
//! let connector = MockConnector::new(adapter).with_connection_failure();
//!
//! // Server goes away after three sampling queries
//! let adapter = MockAdapterBuilder::new().with_connection_lost_after(3).build();
//! ```

use crate::adapter::{
    ConnectionError, Connector, DatabaseAdapter, SamplingError, SchemaAccessError,
};
use async_trait::async_trait;
use softkey_core::{ColumnDescriptor, ConnectionConfig, RowLimit, Value, ValueSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// A column's rows; `None` is SQL NULL
#[derive(Debug, Clone)]
struct MockColumn {
    name: String,
    declared_type: String,
    rows: Vec<Option<Value>>,
}

/// An in-memory table
#[derive(Debug, Clone)]
pub struct MockTable {
    name: String,
    columns: Vec<MockColumn>,
}

impl MockTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column with non-NULL rows
    pub fn column<V, I>(mut self, name: &str, declared_type: &str, rows: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        self.columns.push(MockColumn {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            rows: rows.into_iter().map(|v| Some(v.into())).collect(),
        });
        self
    }

    /// Add a column whose rows may contain NULLs
    pub fn nullable_column<I>(mut self, name: &str, declared_type: &str, rows: I) -> Self
    where
        I: IntoIterator<Item = Option<Value>>,
    {
        self.columns.push(MockColumn {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            rows: rows.into_iter().collect(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn descriptors(&self) -> Vec<ColumnDescriptor> {
        self.columns
            .iter()
            .map(|c| ColumnDescriptor::new(&self.name, &c.name, &c.declared_type))
            .collect()
    }
}

/// A `distinct_values` call seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCall {
    pub table: String,
    pub column: String,
    pub limit: RowLimit,
}

#[derive(Debug, Default)]
struct MockState {
    /// Tables in listing order
    tables: Vec<MockTable>,
    schema_errors: HashMap<String, SchemaAccessError>,
    sampling_errors: HashMap<(String, String), SamplingError>,
    list_error: Option<SchemaAccessError>,
}

/// Mock database adapter for testing
///
/// Clones share state, so a test can keep a handle and mutate the "database"
/// (drop a table, inject an error) while a scan holds another clone.
#[derive(Clone)]
pub struct MockAdapter {
    state: Arc<RwLock<MockState>>,

    /// Every sampling call, in order
    samples: Arc<Mutex<Vec<SampleCall>>>,

    /// Sampling calls served so far, and how many are served before the connection drops
    served: Arc<AtomicUsize>,
    lost_after: Arc<AtomicUsize>,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,

    adapter_name: &'static str,
}

impl MockAdapter {
    /// Create a new mock adapter with no tables
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            samples: Arc::new(Mutex::new(Vec::new())),
            served: Arc::new(AtomicUsize::new(0)),
            lost_after: Arc::new(AtomicUsize::new(usize::MAX)),
            latency_ms: 0,
            adapter_name: "Mock",
        }
    }

    /// Add or replace a table
    pub async fn add_table(&self, table: MockTable) {
        let mut state = self.state.write().await;
        match state.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => *existing = table,
            None => state.tables.push(table),
        }
    }

    /// Remove a table, as if it were dropped mid-scan
    pub async fn drop_table(&self, name: &str) {
        self.state.write().await.tables.retain(|t| t.name != name);
    }

    /// Configure an error to be returned when describing `table`
    pub async fn add_schema_error(&self, table: &str, error: SchemaAccessError) {
        self.state
            .write()
            .await
            .schema_errors
            .insert(table.to_string(), error);
    }

    /// Configure an error to be returned when sampling `table.column`
    pub async fn add_sampling_error(&self, table: &str, column: &str, error: SamplingError) {
        self.state
            .write()
            .await
            .sampling_errors
            .insert((table.to_string(), column.to_string()), error);
    }

    /// Drop the connection once `n` more sampling calls have been served
    ///
    /// Every later call, schema calls included, fails as a lost connection.
    pub fn lose_connection_after(&self, n: usize) {
        let served = self.served.load(Ordering::SeqCst);
        self.lost_after.store(served.saturating_add(n), Ordering::SeqCst);
    }

    /// Configure simulated latency for every query
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set a custom adapter name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.adapter_name = name;
        self
    }

    /// All sampling calls made so far
    pub fn sample_calls(&self) -> Vec<SampleCall> {
        self.samples.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Sampling calls made for one column
    pub fn sample_count(&self, table: &str, column: &str) -> usize {
        self.sample_calls()
            .iter()
            .filter(|c| c.table == table && c.column == column)
            .count()
    }

    /// Forget recorded sampling calls
    pub fn clear_sample_calls(&self) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
    }

    /// Get the number of tables stored in the adapter
    pub async fn table_count(&self) -> usize {
        self.state.read().await.tables.len()
    }

    /// The error every call returns once the simulated connection is gone
    fn lost_connection(&self) -> Option<ConnectionError> {
        if self.served.load(Ordering::SeqCst) < self.lost_after.load(Ordering::SeqCst) {
            return None;
        }
        Some(ConnectionError {
            host: "mock".to_string(),
            database: self.adapter_name.to_string(),
            reason: "server closed the connection unexpectedly".to_string(),
        })
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        self.adapter_name
    }

    async fn list_tables(&self) -> Result<Vec<String>, SchemaAccessError> {
        self.simulate_latency().await;

        if let Some(lost) = self.lost_connection() {
            return Err(SchemaAccessError::ConnectionLost {
                table: "*".to_string(),
                source: lost,
            });
        }

        let state = self.state.read().await;
        if let Some(error) = &state.list_error {
            return Err(error.clone());
        }
        Ok(state.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, SchemaAccessError> {
        self.simulate_latency().await;

        if let Some(lost) = self.lost_connection() {
            return Err(SchemaAccessError::ConnectionLost {
                table: table.to_string(),
                source: lost,
            });
        }

        let state = self.state.read().await;
        if let Some(error) = state.schema_errors.get(table) {
            return Err(error.clone());
        }
        state
            .tables
            .iter()
            .find(|t| t.name == table)
            .map(MockTable::descriptors)
            .ok_or_else(|| SchemaAccessError::TableNotFound(table.to_string()))
    }

    async fn distinct_values(
        &self,
        column: &ColumnDescriptor,
        limit: RowLimit,
    ) -> Result<ValueSet, SamplingError> {
        self.simulate_latency().await;

        if let Some(lost) = self.lost_connection() {
            return Err(SamplingError::ConnectionLost(lost));
        }
        self.served.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut samples) = self.samples.lock() {
            samples.push(SampleCall {
                table: column.table.clone(),
                column: column.name.clone(),
                limit,
            });
        }

        let state = self.state.read().await;
        if let Some(error) = state
            .sampling_errors
            .get(&(column.table.clone(), column.name.clone()))
        {
            return Err(error.clone());
        }

        let source = state
            .tables
            .iter()
            .find(|t| t.name == column.table)
            .and_then(|t| t.columns.iter().find(|c| c.name == column.name))
            .ok_or_else(|| SamplingError::QueryError {
                table: column.table.clone(),
                column: column.name.clone(),
                reason: "relation or column does not exist".to_string(),
            })?;

        // SELECT DISTINCT ... WHERE col IS NOT NULL LIMIT n, in row order
        let cap = limit.as_option().map_or(usize::MAX, |n| n as usize);
        let mut values = ValueSet::new();
        for value in source.rows.iter().flatten() {
            if values.len() >= cap {
                break;
            }
            values.insert(value.clone());
        }
        Ok(values)
    }

    async fn test_connection(&self) -> Result<(), ConnectionError> {
        self.simulate_latency().await;
        match self.lost_connection() {
            Some(lost) => Err(lost),
            None => Ok(()),
        }
    }
}

/// Builder for creating MockAdapter with multiple tables
pub struct MockAdapterBuilder {
    state: MockState,
    lost_after: usize,
    latency_ms: u64,
    adapter_name: &'static str,
}

impl MockAdapterBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            state: MockState::default(),
            lost_after: usize::MAX,
            latency_ms: 0,
            adapter_name: "Mock",
        }
    }

    /// Add a table; tables are listed in insertion order
    pub fn with_table(mut self, table: MockTable) -> Self {
        self.state.tables.retain(|t| t.name != table.name);
        self.state.tables.push(table);
        self
    }

    /// Add an error for describing a specific table
    pub fn with_schema_error(mut self, table: &str, error: SchemaAccessError) -> Self {
        self.state.schema_errors.insert(table.to_string(), error);
        self
    }

    /// Add an error for sampling a specific column
    pub fn with_sampling_error(mut self, table: &str, column: &str, error: SamplingError) -> Self {
        self.state
            .sampling_errors
            .insert((table.to_string(), column.to_string()), error);
        self
    }

    /// Make table listing fail
    pub fn with_list_error(mut self, error: SchemaAccessError) -> Self {
        self.state.list_error = Some(error);
        self
    }

    /// Drop the connection after `n` sampling calls
    pub fn with_connection_lost_after(mut self, n: usize) -> Self {
        self.lost_after = n;
        self
    }

    /// Configure latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set adapter name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.adapter_name = name;
        self
    }

    /// Build the MockAdapter
    pub fn build(self) -> MockAdapter {
        MockAdapter {
            state: Arc::new(RwLock::new(self.state)),
            samples: Arc::new(Mutex::new(Vec::new())),
            served: Arc::new(AtomicUsize::new(0)),
            lost_after: Arc::new(AtomicUsize::new(self.lost_after)),
            latency_ms: self.latency_ms,
            adapter_name: self.adapter_name,
        }
    }
}

impl Default for MockAdapterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Connector handing out clones of one [`MockAdapter`]
#[derive(Clone)]
pub struct MockConnector {
    adapter: MockAdapter,
    fail_connection: bool,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(adapter: MockAdapter) -> Self {
        Self {
            adapter,
            fail_connection: false,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure to fail every connection attempt
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// The adapter connections are served from
    pub fn adapter(&self) -> &MockAdapter {
        &self.adapter
    }

    /// Number of connection attempts so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseAdapter>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.fail_connection {
            return Err(ConnectionError::new(config, "Simulated connection failure"));
        }
        Ok(Arc::new(self.adapter.clone()))
    }
}
