//! Database adapter traits: schema inspection and value sampling

use async_trait::async_trait;
use softkey_core::{ColumnDescriptor, ConnectionConfig, RowLimit, ValueSet};
use std::sync::Arc;

/// The connection could not be opened (or was lost)
///
/// Fatal for the stage that needed it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Connection to database '{database}' on {host} failed: {reason}")]
pub struct ConnectionError {
    pub host: String,
    pub database: String,
    pub reason: String,
}

impl ConnectionError {
    /// Build an error carrying the identity of `config`
    pub fn new(config: &ConnectionConfig, reason: impl Into<String>) -> Self {
        Self {
            host: config.host.clone(),
            database: config.database.clone(),
            reason: reason.into(),
        }
    }
}

/// Table or column metadata could not be read
///
/// Scoped to one table: the scan skips that table and carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaAccessError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Metadata query failed for '{table}': {reason}")]
    QueryError { table: String, reason: String },

    /// The connection dropped while reading metadata; fatal like [`ConnectionError`]
    #[error("Metadata for '{table}' unavailable: {source}")]
    ConnectionLost {
        table: String,
        #[source]
        source: ConnectionError,
    },
}

impl SchemaAccessError {
    /// Table the error refers to
    pub fn table(&self) -> &str {
        match self {
            Self::TableNotFound(table) | Self::PermissionDenied(table) => table,
            Self::QueryError { table, .. } | Self::ConnectionLost { table, .. } => table,
        }
    }

    /// The underlying connection error, when the connection itself is gone
    pub fn connection_lost(&self) -> Option<&ConnectionError> {
        match self {
            Self::ConnectionLost { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Distinct values of a column could not be sampled
///
/// Scoped to one column: the column simply cannot match. The exception is
/// [`SamplingError::ConnectionLost`], which ends the stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplingError {
    #[error("Unsupported type '{declared_type}' for {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        declared_type: String,
    },

    #[error("Distinct query failed for {table}.{column}: {reason}")]
    QueryError {
        table: String,
        column: String,
        reason: String,
    },

    #[error(transparent)]
    ConnectionLost(#[from] ConnectionError),
}

/// An open connection to one database
///
/// Table and column names passed in always come from this adapter's own
/// `list_tables`/`describe_columns` results.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Get the adapter name (e.g., "PostgreSQL")
    fn name(&self) -> &'static str;

    /// Tables of the scanned namespace, in a stable order
    async fn list_tables(&self) -> Result<Vec<String>, SchemaAccessError>;

    /// Columns of `table` with their exact engine-reported types, in ordinal order
    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, SchemaAccessError>;

    /// Distinct non-NULL values of `column`, capped at `limit` distinct values
    async fn distinct_values(
        &self,
        column: &ColumnDescriptor,
        limit: RowLimit,
    ) -> Result<ValueSet, SamplingError>;

    /// Run a trivial query to prove the connection works
    async fn test_connection(&self) -> Result<(), ConnectionError>;
}

/// Opens [`DatabaseAdapter`]s from connection settings
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseAdapter>, ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_carries_identity() {
        let config = ConnectionConfig::new("db.internal", "legacy", "scanner");
        let err = ConnectionError::new(&config, "timed out");

        assert_eq!(err.host, "db.internal");
        assert_eq!(err.database, "legacy");
        assert_eq!(
            err.to_string(),
            "Connection to database 'legacy' on db.internal failed: timed out"
        );
    }

    #[test]
    fn schema_error_names_table() {
        let err = SchemaAccessError::QueryError {
            table: "orders".to_string(),
            reason: "relation dropped".to_string(),
        };
        assert_eq!(err.table(), "orders");
        assert_eq!(SchemaAccessError::TableNotFound("x".into()).table(), "x");
        assert!(err.connection_lost().is_none());
    }

    #[test]
    fn lost_connection_keeps_identity() {
        let config = ConnectionConfig::new("db.internal", "legacy", "scanner");
        let lost = ConnectionError::new(&config, "connection closed");

        let schema = SchemaAccessError::ConnectionLost {
            table: "orders".to_string(),
            source: lost.clone(),
        };
        assert_eq!(schema.table(), "orders");
        assert_eq!(schema.connection_lost(), Some(&lost));

        let sampling = SamplingError::from(lost.clone());
        assert_eq!(sampling, SamplingError::ConnectionLost(lost));
    }
}
