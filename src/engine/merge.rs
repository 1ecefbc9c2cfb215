//! Field merge policy: entry fields override, absent fields fall back to the
//! current row (update) or the declared insert default (insert).

use serde_json::{Map, Value};

use crate::database::postgres::sql_value::{ConversionError, SqlValue};
use crate::schema::TableSchema;

/// Produces the full column-value list, in schema order, for a fresh insert.
/// Absent fields take the column's declared insert default, or NULL when no
/// default is declared.
pub fn merge_for_insert(
    schema: &TableSchema,
    id: i64,
    fields: &Map<String, Value>,
) -> Result<Vec<SqlValue>, ConversionError> {
    schema
        .columns()
        .iter()
        .map(|column| {
            if column.name == schema.id_column() {
                return Ok(SqlValue::BigInt(id));
            }
            match fields.get(&column.name) {
                Some(value) => SqlValue::from_json(column, value),
                None => match &column.insert_default {
                    Some(default) => SqlValue::from_json(column, default),
                    None => Ok(SqlValue::Null(column.kind)),
                },
            }
        })
        .collect()
}

/// Produces the full column-value list, in schema order, for an update of an
/// existing row. Absent fields carry the current row's value forward; insert
/// defaults are never consulted here.
pub fn merge_for_update(
    schema: &TableSchema,
    id: i64,
    fields: &Map<String, Value>,
    current: &Map<String, Value>,
) -> Result<Vec<SqlValue>, ConversionError> {
    schema
        .columns()
        .iter()
        .map(|column| {
            if column.name == schema.id_column() {
                return Ok(SqlValue::BigInt(id));
            }
            let value = match fields.get(&column.name) {
                Some(value) => value,
                None => current.get(&column.name).unwrap_or(&Value::Null),
            };
            SqlValue::from_json(column, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::{column, ColumnKind};

    fn users_schema() -> TableSchema {
        TableSchema::new(
            "users",
            "id",
            vec![
                column("id", ColumnKind::BigInt),
                column("name", ColumnKind::Text),
                column("is_admin", ColumnKind::Bool).with_insert_default(json!(false)),
                column("note", ColumnKind::Text).nullable(),
            ],
        )
        .unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_insert_applies_declared_default() {
        let merged =
            merge_for_insert(&users_schema(), 77, &object(json!({"name": "x"}))).unwrap();

        assert!(matches!(merged[0], SqlValue::BigInt(77)));
        assert!(matches!(merged[1], SqlValue::Text(ref v) if v == "x"));
        assert!(matches!(merged[2], SqlValue::Bool(false))); // default applied
        assert!(matches!(merged[3], SqlValue::Null(ColumnKind::Text))); // no default
    }

    #[test]
    fn test_insert_explicit_value_beats_default() {
        let merged = merge_for_insert(
            &users_schema(),
            1,
            &object(json!({"name": "x", "is_admin": true})),
        )
        .unwrap();
        assert!(matches!(merged[2], SqlValue::Bool(true)));
    }

    #[test]
    fn test_update_carries_current_values_forward() {
        let current = object(json!({"id": 77, "name": "x", "is_admin": true, "note": null}));
        let merged =
            merge_for_update(&users_schema(), 77, &object(json!({"name": "y"})), &current)
                .unwrap();

        assert!(matches!(merged[1], SqlValue::Text(ref v) if v == "y")); // overridden
        assert!(matches!(merged[2], SqlValue::Bool(true))); // preserved, not defaulted
        assert!(matches!(merged[3], SqlValue::Null(_)));
    }

    #[test]
    fn test_update_explicit_null_writes_null() {
        let current = object(json!({"id": 5, "name": "x", "is_admin": false, "note": "keep?"}));
        let merged =
            merge_for_update(&users_schema(), 5, &object(json!({"note": null})), &current)
                .unwrap();
        assert!(matches!(merged[3], SqlValue::Null(_)));
    }

    #[test]
    fn test_merge_propagates_type_mismatch() {
        let result = merge_for_insert(&users_schema(), 1, &object(json!({"name": 42})));
        assert!(result.is_err());

        let current = object(json!({"id": 1, "name": "x", "is_admin": false, "note": null}));
        let result =
            merge_for_update(&users_schema(), 1, &object(json!({"is_admin": "yes"})), &current);
        assert!(result.is_err());
    }
}
