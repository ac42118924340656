//! Test fixtures for scan integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use softkey_catalog::{
    ConnectionError, Connector, DatabaseAdapter, MockAdapter, MockAdapterBuilder, MockConnector,
    MockTable,
};
use softkey_core::{ConnectionConfig, RowLimit};
use softkey_engine::{CancelFlag, ScanObserver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn connection() -> ConnectionConfig {
    ConnectionConfig::new("localhost", "shop", "root")
}

/// `Orders(customer_id)` values {1,2,3}, `Customers(id)` values {1,2,3,4}
pub fn orders_customers() -> MockAdapter {
    MockAdapterBuilder::new()
        .with_table(MockTable::new("Orders").column("customer_id", "integer", [1, 2, 3, 3, 1]))
        .with_table(MockTable::new("Customers").column("id", "integer", [1, 2, 3, 4]))
        .build()
}

/// A small legacy order-entry schema
///
/// - `order_lines.order_id` -> `orders.id`
/// - `order_lines.sku` -> `products.sku`
/// - `orders.customer_id` -> `customers.id`
/// - `audit_log` shares no values with anything
pub fn legacy_shop() -> MockAdapter {
    MockAdapterBuilder::new()
        .with_table(
            MockTable::new("customers")
                .column("id", "integer", [1, 2, 3, 4, 5])
                .column("email", "character varying(255)", [
                    "ann@example.com",
                    "bob@example.com",
                    "cy@example.com",
                    "dee@example.com",
                    "eve@example.com",
                ]),
        )
        .with_table(
            MockTable::new("orders")
                .column("id", "bigint", [1000_i64, 1001, 1002, 1003])
                .column("customer_id", "integer", [1, 2, 2, 5])
                .column("status", "character varying(16)", ["new", "paid", "paid", "shipped"]),
        )
        .with_table(
            MockTable::new("products")
                .column("sku", "character varying(32)", ["A-1", "B-2", "C-3", "D-4"])
                .column("stock", "integer", [40, 0, 12, 7]),
        )
        .with_table(
            MockTable::new("order_lines")
                .column("order_id", "bigint", [1000_i64, 1000, 1001, 1003])
                .column("sku", "character varying(32)", ["A-1", "C-3", "C-3", "D-4"])
                .column("qty", "integer", [1, 2, 1, 3]),
        )
        .with_table(MockTable::new("audit_log").column("event", "text", ["login", "logout"]))
        .build()
}

/// Hands out a different adapter on each connection, as if the data
/// changed between stages
pub struct SequenceConnector {
    adapters: Vec<MockAdapter>,
    connects: AtomicUsize,
}

impl SequenceConnector {
    pub fn new(adapters: Vec<MockAdapter>) -> Self {
        Self {
            adapters,
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for SequenceConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseAdapter>, ConnectionError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        let adapter = self
            .adapters
            .get(n)
            .or_else(|| self.adapters.last())
            .cloned()
            .ok_or_else(|| ConnectionError::new(config, "no adapters"))?;
        Ok(Arc::new(adapter))
    }
}

/// Serves one adapter per database name, like two servers behind one connector
#[derive(Default)]
pub struct DatabaseConnector {
    databases: HashMap<String, MockAdapter>,
}

impl DatabaseConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, database: &str, adapter: MockAdapter) -> Self {
        self.databases.insert(database.to_string(), adapter);
        self
    }
}

#[async_trait]
impl Connector for DatabaseConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseAdapter>, ConnectionError> {
        let adapter = self
            .databases
            .get(&config.database)
            .cloned()
            .ok_or_else(|| ConnectionError::new(config, "database does not exist"))?;
        Ok(Arc::new(adapter))
    }
}

/// Billing database whose `invoices.account_ref` points at `crm.accounts.id`
pub fn billing() -> MockAdapter {
    MockAdapterBuilder::new()
        .with_table(
            MockTable::new("invoices")
                .column("id", "integer", [500, 501, 502, 503, 504, 505, 506])
                .column("account_ref", "integer", [11, 12, 13, 14, 15, 16, 16])
                .column("currency", "character(3)", ["EUR", "USD"]),
        )
        .build()
}

pub fn crm() -> MockAdapter {
    MockAdapterBuilder::new()
        .with_table(
            MockTable::new("accounts")
                .column("id", "integer", [10, 11, 12, 13, 14, 15, 16, 17])
                .column("region", "character(3)", ["EUR", "APA"])
                .column("owner", "text", ["ann", "bob"]),
        )
        .build()
}

pub fn connector(adapter: MockAdapter) -> Arc<MockConnector> {
    Arc::new(MockConnector::new(adapter))
}

/// Records events and raises a cancel flag after `cancel_after` finished tables
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
    cancel: Option<(CancelFlag, usize)>,
    finished: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelling(flag: CancelFlag, cancel_after: usize) -> Self {
        Self {
            cancel: Some((flag, cancel_after)),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Tables started, in order
    pub fn started(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("start ").map(str::to_string))
            .collect()
    }

    /// Tables skipped as already complete, in order
    pub fn skipped(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("skip ").map(str::to_string))
            .collect()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ScanObserver for RecordingObserver {
    fn stage_started(&self, limit: RowLimit) {
        self.push(format!("stage {}", limit));
    }

    fn table_skipped(&self, table: &str) {
        self.push(format!("skip {}", table));
    }

    fn table_started(&self, table: &str) {
        self.push(format!("start {}", table));
    }

    fn table_failed(&self, table: &str, _reason: &str) {
        self.push(format!("fail {}", table));
    }

    fn table_finished(&self, table: &str, done: usize, total: usize) {
        self.push(format!("finish {} {}/{}", table, done, total));

        let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((flag, after)) = &self.cancel {
            if finished >= *after {
                flag.cancel();
            }
        }
    }

    fn connection_failed(&self, reason: &str) {
        self.push(format!("connection failed: {}", reason));
    }
}
