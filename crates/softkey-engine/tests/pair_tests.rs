//! Pairwise table comparison across databases
//!
//! ```bash
//! cargo test -p softkey-engine --test pair_tests
//! ```

mod fixtures;

use fixtures::{billing, crm, DatabaseConnector};
use pretty_assertions::assert_eq;
use softkey_catalog::SamplingError;
use softkey_core::{ConnectionConfig, RowLimit};
use softkey_engine::{PairCriterion, ScanError, Scanner, TableRef};
use std::sync::Arc;

fn database(name: &str) -> ConnectionConfig {
    ConnectionConfig::new("localhost", name, "root")
}

fn pairs(outcome: &softkey_engine::PairOutcome) -> Vec<(&str, &str)> {
    outcome
        .matches
        .iter()
        .map(|m| (m.left_column.as_str(), m.right_column.as_str()))
        .collect()
}

#[tokio::test]
async fn test_cross_database_common_values() {
    let scanner = Scanner::new(Arc::new(
        DatabaseConnector::new()
            .with_database("billing", billing())
            .with_database("crm", crm()),
    ));
    let (left, right) = (database("billing"), database("crm"));

    let outcome = scanner
        .compare_tables(
            TableRef::new(&left, "invoices"),
            TableRef::new(&right, "accounts"),
            PairCriterion::default(),
            RowLimit::Unbounded,
        )
        .await
        .unwrap();

    assert_eq!(outcome.left, "localhost_billing.invoices");
    assert_eq!(outcome.right, "localhost_crm.accounts");
    // id x id, account_ref x id, currency x region
    assert_eq!(outcome.compared, 3);
    assert_eq!(pairs(&outcome), vec![("account_ref", "id")]);
    assert_eq!(outcome.matches[0].common_values, 6);
    assert!((outcome.matches[0].ratio - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_ratio_criterion() {
    let scanner = Scanner::new(Arc::new(
        DatabaseConnector::new()
            .with_database("billing", billing())
            .with_database("crm", crm()),
    ));
    let (left, right) = (database("billing"), database("crm"));

    let outcome = scanner
        .compare_tables(
            TableRef::new(&left, "invoices"),
            TableRef::new(&right, "accounts"),
            PairCriterion::Ratio(0.5),
            RowLimit::Unbounded,
        )
        .await
        .unwrap();

    assert_eq!(pairs(&outcome), vec![("account_ref", "id"), ("currency", "region")]);
    assert_eq!(outcome.matches[1].declared_type, "character(3)");
}

#[tokio::test]
async fn test_row_limit_applies_to_both_sides() {
    let left_db = billing();
    let right_db = crm();
    let scanner = Scanner::new(Arc::new(
        DatabaseConnector::new()
            .with_database("billing", left_db.clone())
            .with_database("crm", right_db.clone()),
    ));
    let (left, right) = (database("billing"), database("crm"));

    let outcome = scanner
        .compare_tables(
            TableRef::new(&left, "invoices"),
            TableRef::new(&right, "accounts"),
            PairCriterion::CommonValues(2),
            RowLimit::Limited(3),
        )
        .await
        .unwrap();

    // {11,12,13} against {10,11,12}
    assert_eq!(pairs(&outcome), vec![("account_ref", "id")]);
    assert_eq!(outcome.matches[0].common_values, 2);
    assert!(left_db
        .sample_calls()
        .iter()
        .chain(right_db.sample_calls().iter())
        .all(|c| c.limit == RowLimit::Limited(3)));
    // accounts.id takes part in two pairs but is sampled once
    assert_eq!(right_db.sample_count("accounts", "id"), 1);
    assert_eq!(right_db.sample_count("accounts", "owner"), 0);
}

#[tokio::test]
async fn test_sampling_failure_only_drops_that_pair() {
    let left_db = billing();
    left_db
        .add_sampling_error(
            "invoices",
            "currency",
            SamplingError::QueryError {
                table: "invoices".into(),
                column: "currency".into(),
                reason: "canceling statement due to statement timeout".into(),
            },
        )
        .await;
    let scanner = Scanner::new(Arc::new(
        DatabaseConnector::new()
            .with_database("billing", left_db)
            .with_database("crm", crm()),
    ));
    let (left, right) = (database("billing"), database("crm"));

    let outcome = scanner
        .compare_tables(
            TableRef::new(&left, "invoices"),
            TableRef::new(&right, "accounts"),
            PairCriterion::Ratio(0.5),
            RowLimit::Unbounded,
        )
        .await
        .unwrap();

    assert_eq!(pairs(&outcome), vec![("account_ref", "id")]);
    assert_eq!(outcome.compared, 3);
}

#[tokio::test]
async fn test_unknown_database_is_a_connection_error() {
    let scanner = Scanner::new(Arc::new(DatabaseConnector::new().with_database("billing", billing())));
    let (left, right) = (database("billing"), database("warehouse"));

    let err = scanner
        .compare_tables(
            TableRef::new(&left, "invoices"),
            TableRef::new(&right, "accounts"),
            PairCriterion::default(),
            RowLimit::Unbounded,
        )
        .await
        .unwrap_err();

    match err {
        ScanError::Connection(e) => assert_eq!(e.database, "warehouse"),
        other => panic!("expected connection error, got {other}"),
    }
}

#[tokio::test]
async fn test_missing_table_ends_comparison() {
    let scanner = Scanner::new(Arc::new(
        DatabaseConnector::new()
            .with_database("billing", billing())
            .with_database("crm", crm()),
    ));
    let (left, right) = (database("billing"), database("crm"));

    let err = scanner
        .compare_tables(
            TableRef::new(&left, "invoices"),
            TableRef::new(&right, "contacts"),
            PairCriterion::default(),
            RowLimit::Unbounded,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::TableSchema { ref table, .. } if table == "contacts"));
}

#[tokio::test]
async fn test_lost_connection_ends_comparison() {
    let right_db = crm();
    right_db.lose_connection_after(0);
    let scanner = Scanner::new(Arc::new(
        DatabaseConnector::new()
            .with_database("billing", billing())
            .with_database("crm", right_db),
    ));
    let (left, right) = (database("billing"), database("crm"));

    let err = scanner
        .compare_tables(
            TableRef::new(&left, "invoices"),
            TableRef::new(&right, "accounts"),
            PairCriterion::default(),
            RowLimit::Unbounded,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::ConnectionLost { .. }));
}
