//! Test fixtures for adapter integration tests
//!
//! In-memory tables shaped like a small legacy order-entry schema: keys are
//! plain integer/varchar columns with no declared constraints.

use softkey_catalog::{MockAdapter, MockAdapterBuilder, MockTable};

/// Customers with integer ids 1..=4
pub fn customers_table() -> MockTable {
    MockTable::new("customers")
        .column("id", "integer", [1, 2, 3, 4])
        .column("email", "character varying(255)", [
            "ann@example.com",
            "bob@example.com",
            "cy@example.com",
            "dee@example.com",
        ])
}

/// Orders referencing customers 1..=3
pub fn orders_table() -> MockTable {
    MockTable::new("orders")
        .column("id", "integer", [100, 101, 102, 103])
        .column("customer_id", "integer", [1, 2, 3, 3])
        .column("status", "character varying(16)", ["new", "paid", "paid", "shipped"])
}

/// Products keyed by a varchar SKU
pub fn products_table() -> MockTable {
    MockTable::new("products")
        .column("sku", "character varying(32)", ["A-1", "B-2", "C-3"])
        .column("price", "numeric(10,2)", ["9.99", "19.50", "4.00"])
}

/// Adapter holding customers, orders and products
pub fn shop_adapter() -> MockAdapter {
    MockAdapterBuilder::new()
        .with_table(customers_table())
        .with_table(orders_table())
        .with_table(products_table())
        .build()
}
