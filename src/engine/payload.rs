//! Payload normalization: one object or an ordered array of them becomes an
//! ordered list of immutable entries before any SQL is issued.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::TableSchema;

/// The semi-structured input describing one or many rows. Deserializes from
/// either a single JSON value or an array of them.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum Payload {
    Many(Vec<Value>),
    Single(Value),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(entries) => Payload::Many(entries),
            other => Payload::Single(other),
        }
    }
}

impl From<Vec<Value>> for Payload {
    fn from(entries: Vec<Value>) -> Self {
        Payload::Many(entries)
    }
}

impl Payload {
    fn into_entries(self) -> Vec<Value> {
        match self {
            Payload::Many(entries) => entries,
            Payload::Single(value) => vec![value],
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("Entry {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("Entry {index} identifier must be an integer, got {value}")]
    InvalidIdentifier { index: usize, value: String },

    #[error("Entry {index} carries no identifier")]
    MissingIdentifier { index: usize },
}

/// One normalized upsert entry: an optional identifier plus the entry's known
/// fields. Unknown fields have already been dropped.
#[derive(Debug, Clone)]
pub struct UpsertEntry {
    pub id: Option<i64>,
    pub fields: Map<String, Value>,
}

fn extract_identifier(
    object: &mut Map<String, Value>,
    schema: &TableSchema,
    index: usize,
) -> Result<Option<i64>, PayloadError> {
    match object.remove(schema.id_column()) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(id) => Ok(Some(id)),
            None => Err(PayloadError::InvalidIdentifier {
                index,
                value: Value::Number(n).to_string(),
            }),
        },
        Some(other) => {
            Err(PayloadError::InvalidIdentifier { index, value: other.to_string() })
        }
    }
}

/// Normalizes an upsert payload. Each entry must be an object; the identifier
/// field is split out, unknown fields are dropped, entry order is preserved.
pub fn normalize_upsert(
    payload: Payload,
    schema: &TableSchema,
) -> Result<Vec<UpsertEntry>, PayloadError> {
    payload
        .into_entries()
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let Value::Object(mut object) = entry else {
                return Err(PayloadError::NotAnObject { index });
            };

            let id = extract_identifier(&mut object, schema, index)?;

            let fields: Map<String, Value> =
                object.into_iter().filter(|(key, _)| schema.column(key).is_some()).collect();

            Ok(UpsertEntry { id, fields })
        })
        .collect()
}

/// Normalizes a delete payload. Entries may be bare identifiers or objects
/// carrying the identifier field; every entry must name an existing-row
/// identifier.
pub fn normalize_delete(payload: Payload, schema: &TableSchema) -> Result<Vec<i64>, PayloadError> {
    payload
        .into_entries()
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Number(n) => n.as_i64().ok_or(PayloadError::InvalidIdentifier {
                index,
                value: Value::Number(n.clone()).to_string(),
            }),
            Value::Object(mut object) => {
                match extract_identifier(&mut object, schema, index)? {
                    Some(id) => Ok(id),
                    None => Err(PayloadError::MissingIdentifier { index }),
                }
            }
            other => Err(PayloadError::InvalidIdentifier { index, value: other.to_string() }),
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
                column("is_admin", ColumnKind::Bool),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_payload_deserializes_single_and_many() {
        let single: Payload = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert!(matches!(single, Payload::Single(_)));

        let many: Payload = serde_json::from_str(r#"[{"name": "x"}, {"name": "y"}]"#).unwrap();
        assert!(matches!(many, Payload::Many(ref entries) if entries.len() == 2));
    }

    #[test]
    fn test_normalize_upsert_wraps_single_object() {
        let entries = normalize_upsert(json!({"name": "x"}).into(), &users_schema()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, None);
        assert_eq!(entries[0].fields.get("name"), Some(&json!("x")));
    }

    #[test]
    fn test_normalize_upsert_preserves_order() {
        let payload = json!([
            {"id": 3, "name": "c"},
            {"name": "new"},
            {"id": 1, "name": "a"},
        ]);
        let entries = normalize_upsert(payload.into(), &users_schema()).unwrap();
        let ids: Vec<Option<i64>> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![Some(3), None, Some(1)]);
    }

    #[test]
    fn test_normalize_upsert_ignores_unknown_fields() {
        let entries = normalize_upsert(
            json!({"name": "x", "shoe_size": 43, "favourite_colour": "teal"}).into(),
            &users_schema(),
        )
        .unwrap();
        assert_eq!(entries[0].fields.len(), 1);
        assert!(entries[0].fields.contains_key("name"));
    }

    #[test]
    fn test_normalize_upsert_null_identifier_means_insert() {
        let entries =
            normalize_upsert(json!({"id": null, "name": "x"}).into(), &users_schema()).unwrap();
        assert_eq!(entries[0].id, None);
    }

    #[test]
    fn test_normalize_upsert_rejects_non_object_entries() {
        let result = normalize_upsert(json!([{"name": "x"}, 42]).into(), &users_schema());
        assert!(matches!(result, Err(PayloadError::NotAnObject { index: 1 })));

        let result = normalize_upsert(json!("just a string").into(), &users_schema());
        assert!(matches!(result, Err(PayloadError::NotAnObject { index: 0 })));
    }

    #[test]
    fn test_normalize_upsert_rejects_non_integer_identifier() {
        let result = normalize_upsert(json!({"id": "seven"}).into(), &users_schema());
        assert!(matches!(result, Err(PayloadError::InvalidIdentifier { index: 0, .. })));

        let result = normalize_upsert(json!({"id": 1.5}).into(), &users_schema());
        assert!(matches!(result, Err(PayloadError::InvalidIdentifier { index: 0, .. })));
    }

    #[test]
    fn test_normalize_delete_accepts_bare_ids_and_objects() {
        let ids = normalize_delete(json!([1, {"id": 2}, 3]).into(), &users_schema()).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);

        let ids = normalize_delete(json!(7).into(), &users_schema()).unwrap();
        assert_eq!(ids, vec![7]);
    }

    #[test]
    fn test_normalize_delete_requires_identifier() {
        let result = normalize_delete(json!({"name": "x"}).into(), &users_schema());
        assert!(matches!(result, Err(PayloadError::MissingIdentifier { index: 0 })));

        let result = normalize_delete(json!(["x"]).into(), &users_schema());
        assert!(matches!(result, Err(PayloadError::InvalidIdentifier { index: 0, .. })));
    }
}
