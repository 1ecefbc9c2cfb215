//! The single trusted path that turns a validated [`TableSchema`] into the
//! statements the engine executes. Only identifiers that already passed the
//! schema/routing validation reach these functions; every value travels as a
//! bound parameter.

use crate::schema::TableSchema;

/// Reserved SQL keywords that need quoting.
pub const RESERVED_KEYWORDS: &[&str] =
    &["group", "user", "order", "table", "index", "primary", "key"];

/// Quotes an identifier if it's a reserved keyword.
#[inline]
pub fn quote_identifier(name: &str) -> String {
    if RESERVED_KEYWORDS.contains(&name) {
        format!("\"{}\"", name)
    } else {
        name.to_string()
    }
}

/// Formats a table name, handling schema.table format.
pub fn format_table_name(table_name: &str) -> String {
    if table_name.contains('.') {
        let parts: Vec<&str> = table_name.split('.').collect();
        if parts.len() == 2 {
            let schema = parts[0].trim_matches('"');
            let table = parts[1].trim_matches('"');
            format!("\"{}\".\"{}\"", schema, table)
        } else {
            table_name.to_string()
        }
    } else {
        table_name.to_string()
    }
}

fn column_list(schema: &TableSchema) -> String {
    schema.columns().iter().map(|c| quote_identifier(&c.name)).collect::<Vec<_>>().join(", ")
}

/// `SELECT ... FOR UPDATE` by identifier. The row lock is held until the
/// surrounding transaction commits or rolls back.
pub fn build_lock_select(schema: &TableSchema, table_name: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = $1::BIGINT FOR UPDATE",
        column_list(schema),
        format_table_name(table_name),
        quote_identifier(schema.id_column()),
    )
}

/// Allocates the next identifier from the table's backing sequence. Table and
/// column names are values here, not interpolated identifiers.
pub const NEXTVAL_SQL: &str = "SELECT nextval(pg_get_serial_sequence($1::TEXT, $2::TEXT))";

/// `INSERT ... ON CONFLICT (id) DO UPDATE ... RETURNING` over the full column
/// list in schema order. Placeholders carry explicit casts so the statement
/// types check without relying on inference.
pub fn build_upsert(schema: &TableSchema, table_name: &str) -> String {
    let placeholders = schema
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| format!("${}::{}", i + 1, c.kind.sql_name()))
        .collect::<Vec<_>>()
        .join(", ");

    let id_column = quote_identifier(schema.id_column());

    let update_clauses = schema
        .data_columns()
        .map(|c| {
            let name = quote_identifier(&c.name);
            format!("{} = EXCLUDED.{}", name, name)
        })
        .collect::<Vec<_>>();

    // A table of only the identifier still needs DO UPDATE for RETURNING to
    // yield the row on conflict.
    let update_clause = if update_clauses.is_empty() {
        format!("{} = EXCLUDED.{}", id_column, id_column)
    } else {
        update_clauses.join(", ")
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {} RETURNING {}",
        format_table_name(table_name),
        column_list(schema),
        placeholders,
        id_column,
        update_clause,
        column_list(schema),
    )
}

/// `DELETE ... RETURNING` by identifier, returning the row as it existed
/// immediately before removal.
pub fn build_delete(schema: &TableSchema, table_name: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = $1::BIGINT RETURNING {}",
        format_table_name(table_name),
        quote_identifier(schema.id_column()),
        column_list(schema),
    )
}
