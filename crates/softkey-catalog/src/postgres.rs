//! PostgreSQL adapter using the system catalogs
//!
//! Tables come from `pg_class`, columns from `pg_attribute` with
//! `format_type(atttypid, atttypmod)` so declared types are exactly what the
//! server reports (`character varying(255)`, `numeric(10,2)`, ...). It works with:
//! - PostgreSQL 9.4+
//! - Amazon Redshift
//! - Other PostgreSQL-compatible databases exposing `pg_catalog`
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = ConnectionConfig::new("localhost", "legacy", "scanner")
//!     .with_password("secret");
//! let adapter = PostgresAdapter::connect(&config).await?;
//! let tables = adapter.list_tables().await?;
//! ```

use crate::adapter::{ConnectionError, Connector, DatabaseAdapter, SamplingError, SchemaAccessError};
use async_trait::async_trait;
use softkey_core::{ColumnDescriptor, ConnectionConfig, RowLimit, ValueSet};
use std::sync::Arc;

#[cfg(feature = "postgres")]
use crate::sql;

#[cfg(feature = "postgres")]
use softkey_core::Value;

#[cfg(feature = "postgres")]
use tokio_postgres::{types::Type, Client, Config as PgConfig, NoTls, Row};

#[cfg(feature = "postgres")]
use postgres_native_tls::MakeTlsConnector;

#[cfg(feature = "postgres")]
use native_tls::TlsConnector;

/// PostgreSQL database adapter
///
/// Holds one client; concurrent queries on it are pipelined by the driver.
pub struct PostgresAdapter {
    /// PostgreSQL client (only available with postgres feature)
    #[cfg(feature = "postgres")]
    client: Client,

    /// Connection host
    host: String,

    /// Connection port
    port: u16,

    /// Database name
    database: String,

    /// Scanned namespace
    schema: String,
}

impl PostgresAdapter {
    /// Connect using `config`, over TLS when `config.tls` is set
    #[cfg(feature = "postgres")]
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let mut pg = PgConfig::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .application_name("softkey");
        if let Some(password) = config.resolve_password() {
            pg.password(password);
        }

        let client = if config.tls {
            let connector = TlsConnector::builder()
                .build()
                .map_err(|e| ConnectionError::new(config, format!("Failed to create TLS connector: {}", e)))?;

            let (client, connection) = pg
                .connect(MakeTlsConnector::new(connector))
                .await
                .map_err(|e| ConnectionError::new(config, e.to_string()))?;
            spawn_connection(config, connection);
            client
        } else {
            let (client, connection) = pg
                .connect(NoTls)
                .await
                .map_err(|e| ConnectionError::new(config, e.to_string()))?;
            spawn_connection(config, connection);
            client
        };

        tracing::debug!(host = %config.host, database = %config.database, "connected to PostgreSQL");

        Ok(Self {
            client,
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            schema: config.schema.clone(),
        })
    }

    /// Create adapter without postgres feature (returns error)
    #[cfg(not(feature = "postgres"))]
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        Err(ConnectionError::new(
            config,
            "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres",
        ))
    }

    /// Get the connection host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the connection port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the database name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Get the scanned namespace
    pub fn schema(&self) -> &str {
        &self.schema
    }

    #[cfg(feature = "postgres")]
    fn connection_error(&self, e: tokio_postgres::Error) -> ConnectionError {
        ConnectionError {
            host: self.host.clone(),
            database: self.database.clone(),
            reason: e.to_string(),
        }
    }
}

/// Whether `e` means the connection itself is gone rather than the query failed
#[cfg(feature = "postgres")]
fn is_connection_loss(e: &tokio_postgres::Error) -> bool {
    use std::error::Error as _;

    e.is_closed()
        || e.source()
            .map_or(false, |source| source.downcast_ref::<std::io::Error>().is_some())
}

/// Drive the connection in the background until the client is dropped
#[cfg(feature = "postgres")]
fn spawn_connection<F>(config: &ConnectionConfig, connection: F)
where
    F: std::future::Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    let host = config.host.clone();
    let port = config.port;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error ({}:{}): {}", host, port, e);
        }
    });
}

/// Decode the single column of a sampling row
#[cfg(feature = "postgres")]
fn decode_value(row: &Row) -> Result<Value, tokio_postgres::Error> {
    let ty = row.columns()[0].type_().clone();
    let value = match ty {
        Type::BOOL => Value::Bool(row.try_get(0)?),
        Type::INT2 => Value::Int(i64::from(row.try_get::<_, i16>(0)?)),
        Type::INT4 => Value::Int(i64::from(row.try_get::<_, i32>(0)?)),
        Type::INT8 => Value::Int(row.try_get(0)?),
        Type::OID => Value::Int(i64::from(row.try_get::<_, u32>(0)?)),
        Type::FLOAT4 => Value::Float(f64::from(row.try_get::<_, f32>(0)?)),
        Type::FLOAT8 => Value::Float(row.try_get(0)?),
        Type::BYTEA => Value::Bytes(row.try_get(0)?),
        Type::CHAR => Value::Int(i64::from(row.try_get::<_, i8>(0)?)),
        _ => Value::Text(row.try_get(0)?),
    };
    Ok(value)
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    #[cfg(feature = "postgres")]
    async fn list_tables(&self) -> Result<Vec<String>, SchemaAccessError> {
        let rows = self
            .client
            .query(sql::LIST_TABLES, &[&self.schema])
            .await
            .map_err(|e| SchemaAccessError::QueryError {
                table: format!("{}.*", self.schema),
                reason: e.to_string(),
            })?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    #[cfg(not(feature = "postgres"))]
    async fn list_tables(&self) -> Result<Vec<String>, SchemaAccessError> {
        Err(disabled_schema_error(&self.schema))
    }

    #[cfg(feature = "postgres")]
    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, SchemaAccessError> {
        let rows = self
            .client
            .query(sql::DESCRIBE_COLUMNS, &[&self.schema, &table])
            .await
            .map_err(|e| {
                let err_str = e.to_string();
                if is_connection_loss(&e) {
                    SchemaAccessError::ConnectionLost {
                        table: table.to_string(),
                        source: self.connection_error(e),
                    }
                } else if err_str.contains("permission denied") {
                    SchemaAccessError::PermissionDenied(table.to_string())
                } else {
                    SchemaAccessError::QueryError {
                        table: table.to_string(),
                        reason: err_str,
                    }
                }
            })?;

        // A table dropped since listing has no live attributes
        if rows.is_empty() {
            return Err(SchemaAccessError::TableNotFound(table.to_string()));
        }

        Ok(rows
            .iter()
            .map(|row| ColumnDescriptor::new(table, row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    #[cfg(not(feature = "postgres"))]
    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, SchemaAccessError> {
        Err(disabled_schema_error(table))
    }

    #[cfg(feature = "postgres")]
    async fn distinct_values(
        &self,
        column: &ColumnDescriptor,
        limit: RowLimit,
    ) -> Result<ValueSet, SamplingError> {
        let query = sql::distinct_query(&self.schema, column, limit);
        tracing::trace!(%query, "sampling");

        let rows = self
            .client
            .query(query.as_str(), &[])
            .await
            .map_err(|e| {
                if is_connection_loss(&e) {
                    SamplingError::ConnectionLost(self.connection_error(e))
                } else {
                    SamplingError::QueryError {
                        table: column.table.clone(),
                        column: column.name.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        rows.iter()
            .map(decode_value)
            .collect::<Result<ValueSet, _>>()
            .map_err(|_| SamplingError::UnsupportedType {
                table: column.table.clone(),
                column: column.name.clone(),
                declared_type: column.declared_type.clone(),
            })
    }

    #[cfg(not(feature = "postgres"))]
    async fn distinct_values(
        &self,
        column: &ColumnDescriptor,
        _limit: RowLimit,
    ) -> Result<ValueSet, SamplingError> {
        Err(SamplingError::QueryError {
            table: column.table.clone(),
            column: column.name.clone(),
            reason: "PostgreSQL support not compiled".to_string(),
        })
    }

    #[cfg(feature = "postgres")]
    async fn test_connection(&self) -> Result<(), ConnectionError> {
        self.client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| self.connection_error(e))?;
        Ok(())
    }

    #[cfg(not(feature = "postgres"))]
    async fn test_connection(&self) -> Result<(), ConnectionError> {
        Err(ConnectionError {
            host: self.host.clone(),
            database: self.database.clone(),
            reason: "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres"
                .to_string(),
        })
    }
}

#[cfg(not(feature = "postgres"))]
fn disabled_schema_error(table: &str) -> SchemaAccessError {
    SchemaAccessError::QueryError {
        table: table.to_string(),
        reason: "PostgreSQL support not compiled".to_string(),
    }
}

/// Opens [`PostgresAdapter`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseAdapter>, ConnectionError> {
        let adapter = PostgresAdapter::connect(config).await?;
        Ok(Arc::new(adapter))
    }
}
