//! Database collaborators for soft foreign key discovery
//!
//! This crate defines what the scan needs from a database (list tables,
//! describe columns, sample distinct values) and provides adapters for it.
//!
//! ## Features
//!
//! Enable database support via Cargo features:
//! - `postgres` - PostgreSQL/Redshift support
//!
//! ## Example
//!
//! ```rust,ignore
//! use softkey_catalog::{Connector, PostgresConnector};
//!
//! let adapter = PostgresConnector.connect(&config.connection).await?;
//! for table in adapter.list_tables().await? {
//!     let columns = adapter.describe_columns(&table).await?;
//! }
//! ```

pub mod adapter;
pub mod mock;
pub mod postgres;
pub mod sql;

pub use adapter::{Connector, ConnectionError, DatabaseAdapter, SamplingError, SchemaAccessError};
pub use mock::{MockAdapter, MockAdapterBuilder, MockConnector, MockTable, SampleCall};
pub use postgres::{PostgresAdapter, PostgresConnector};
