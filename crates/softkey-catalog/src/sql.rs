//! SQL text for the schema inspector and value sampler
//!
//! Identifiers are always quoted, even though they only ever come from the
//! engine's own catalog: legacy schemas are full of mixed-case and reserved names.

use softkey_core::{ColumnDescriptor, RowLimit};

/// Quote an identifier, doubling embedded double quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Declared types the driver decodes into a native [`softkey_core::Value`]
///
/// Everything else is sampled through its `::text` rendering, which is
/// canonical for a fixed declared type (uuid, date, numeric(p,s), arrays, ...).
pub fn is_natively_decoded(declared_type: &str) -> bool {
    if declared_type.trim_end().ends_with("[]") {
        return false;
    }

    let base = declared_type
        .split('(')
        .next()
        .unwrap_or(declared_type)
        .trim();

    matches!(
        base,
        "boolean"
            | "smallint"
            | "integer"
            | "bigint"
            | "oid"
            | "real"
            | "double precision"
            | "text"
            | "character varying"
            | "character"
            | "name"
            | "bytea"
            | "\"char\""
    )
}

/// `SELECT DISTINCT` over one column, NULLs excluded
pub fn distinct_query(schema: &str, column: &ColumnDescriptor, limit: RowLimit) -> String {
    let col = quote_ident(&column.name);
    let table = qualified_table(schema, &column.table);

    let mut query = format!(
        "SELECT DISTINCT {col} AS v FROM {table} WHERE {col} IS NOT NULL",
        col = col,
        table = table
    );
    if let Some(n) = limit.as_option() {
        query.push_str(&format!(" LIMIT {}", n));
    }

    if is_natively_decoded(&column.declared_type) {
        query
    } else {
        format!("SELECT s.v::text FROM ({}) AS s", query)
    }
}

/// Tables (plain and partitioned) of one namespace, by name
pub const LIST_TABLES: &str = r#"
    SELECT c.relname::text
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relkind IN ('r', 'p')
    ORDER BY c.relname
"#;

/// Live columns of one table with `format_type` output, in ordinal order
pub const DESCRIBE_COLUMNS: &str = r#"
    SELECT a.attname::text, pg_catalog.format_type(a.atttypid, a.atttypmod)
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relname = $2
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("Order \"Lines\""), "\"Order \"\"Lines\"\"\"");
        assert_eq!(qualified_table("public", "Orders"), "\"public\".\"Orders\"");
    }

    #[test]
    fn native_decoding_by_declared_type() {
        assert!(is_natively_decoded("integer"));
        assert!(is_natively_decoded("character varying(255)"));
        assert!(is_natively_decoded("character(2)"));
        assert!(!is_natively_decoded("uuid"));
        assert!(!is_natively_decoded("numeric(10,2)"));
        assert!(!is_natively_decoded("timestamp without time zone"));
    }

    #[test]
    fn arrays_are_sampled_as_text() {
        assert!(!is_natively_decoded("character varying(255)[]"));
        assert!(!is_natively_decoded("text[]"));
        assert!(!is_natively_decoded("integer[]"));

        let column = ColumnDescriptor::new("tags", "labels", "character varying(255)[]");
        assert!(distinct_query("public", &column, RowLimit::Limited(5)).starts_with("SELECT s.v::text FROM ("));
    }

    #[test]
    fn bounded_native_query() {
        let column = ColumnDescriptor::new("orders", "customer_id", "integer");
        assert_eq!(
            distinct_query("public", &column, RowLimit::Limited(10)),
            "SELECT DISTINCT \"customer_id\" AS v FROM \"public\".\"orders\" \
             WHERE \"customer_id\" IS NOT NULL LIMIT 10"
        );
    }

    #[test]
    fn unbounded_text_query() {
        let column = ColumnDescriptor::new("orders", "ref", "uuid");
        assert_eq!(
            distinct_query("legacy", &column, RowLimit::Unbounded),
            "SELECT s.v::text FROM (SELECT DISTINCT \"ref\" AS v FROM \"legacy\".\"orders\" \
             WHERE \"ref\" IS NOT NULL) AS s"
        );
    }
}
