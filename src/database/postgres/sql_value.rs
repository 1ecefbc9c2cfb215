//! Bridges JSON payload fields to typed postgres parameters and decoded rows
//! back to JSON objects.

use std::str::FromStr;

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type as PgType};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::schema::{ColumnDefinition, ColumnKind, TableSchema};

#[derive(Debug, Clone)]
pub enum SqlValue {
    BigInt(i64),
    Int(i32),
    SmallInt(i16),
    Bool(bool),
    Text(String),
    Numeric(Decimal),
    Jsonb(Value),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Null(ColumnKind),
}

#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("Field {field} expected {expected}, got {value}")]
    TypeMismatch { field: String, expected: &'static str, value: String },

    #[error("Could not decode column {column} from returned row: {source}")]
    Decode { column: String, source: tokio_postgres::Error },
}

fn summarize(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 60 {
        let truncated: String = rendered.chars().take(60).collect();
        format!("{}...", truncated)
    } else {
        rendered
    }
}

fn mismatch(column: &ColumnDefinition, value: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        field: column.name.clone(),
        expected: column.kind.sql_name(),
        value: summarize(value),
    }
}

impl SqlValue {
    /// Converts one JSON payload field to the column's declared type. JSON
    /// null always converts to SQL NULL; NOT NULL columns reject it at write
    /// time as a constraint violation.
    pub fn from_json(column: &ColumnDefinition, value: &Value) -> Result<SqlValue, ConversionError> {
        if value.is_null() {
            return Ok(SqlValue::Null(column.kind));
        }

        match column.kind {
            ColumnKind::BigInt => {
                value.as_i64().map(SqlValue::BigInt).ok_or_else(|| mismatch(column, value))
            }
            ColumnKind::Int => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(SqlValue::Int)
                .ok_or_else(|| mismatch(column, value)),
            ColumnKind::SmallInt => value
                .as_i64()
                .and_then(|v| i16::try_from(v).ok())
                .map(SqlValue::SmallInt)
                .ok_or_else(|| mismatch(column, value)),
            ColumnKind::Bool => {
                value.as_bool().map(SqlValue::Bool).ok_or_else(|| mismatch(column, value))
            }
            ColumnKind::Text => value
                .as_str()
                .map(|v| SqlValue::Text(v.to_string()))
                .ok_or_else(|| mismatch(column, value)),
            ColumnKind::Numeric => {
                // Numbers and decimal strings both convert; strings keep
                // precision JSON numbers cannot express.
                let raw = match value {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.clone(),
                    _ => return Err(mismatch(column, value)),
                };
                Decimal::from_str(&raw)
                    .map(SqlValue::Numeric)
                    .map_err(|_| mismatch(column, value))
            }
            ColumnKind::Jsonb => Ok(SqlValue::Jsonb(value.clone())),
            ColumnKind::TimestampTz => value
                .as_str()
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|v| SqlValue::TimestampTz(v.with_timezone(&Utc)))
                .ok_or_else(|| mismatch(column, value)),
            ColumnKind::Uuid => value
                .as_str()
                .and_then(|v| Uuid::parse_str(v).ok())
                .map(SqlValue::Uuid)
                .ok_or_else(|| mismatch(column, value)),
        }
    }

    pub fn pg_type(&self) -> PgType {
        let kind = match self {
            SqlValue::BigInt(_) => ColumnKind::BigInt,
            SqlValue::Int(_) => ColumnKind::Int,
            SqlValue::SmallInt(_) => ColumnKind::SmallInt,
            SqlValue::Bool(_) => ColumnKind::Bool,
            SqlValue::Text(_) => ColumnKind::Text,
            SqlValue::Numeric(_) => ColumnKind::Numeric,
            SqlValue::Jsonb(_) => ColumnKind::Jsonb,
            SqlValue::TimestampTz(_) => ColumnKind::TimestampTz,
            SqlValue::Uuid(_) => ColumnKind::Uuid,
            SqlValue::Null(kind) => *kind,
        };

        match kind {
            ColumnKind::BigInt => PgType::INT8,
            ColumnKind::Int => PgType::INT4,
            ColumnKind::SmallInt => PgType::INT2,
            ColumnKind::Bool => PgType::BOOL,
            ColumnKind::Text => PgType::TEXT,
            ColumnKind::Numeric => PgType::NUMERIC,
            ColumnKind::Jsonb => PgType::JSONB,
            ColumnKind::TimestampTz => PgType::TIMESTAMPTZ,
            ColumnKind::Uuid => PgType::UUID,
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &PgType,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::BigInt(value) => i64::to_sql(value, ty, out),
            SqlValue::Int(value) => i32::to_sql(value, ty, out),
            SqlValue::SmallInt(value) => i16::to_sql(value, ty, out),
            SqlValue::Bool(value) => bool::to_sql(value, ty, out),
            SqlValue::Text(value) => String::to_sql(value, ty, out),
            SqlValue::Numeric(value) => Decimal::to_sql(value, ty, out),
            SqlValue::Jsonb(value) => Value::to_sql(value, ty, out),
            SqlValue::TimestampTz(value) => DateTime::<Utc>::to_sql(value, ty, out),
            SqlValue::Uuid(value) => Uuid::to_sql(value, ty, out),
            SqlValue::Null(_) => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &PgType) -> bool {
        // conversion is validated against the schema before params are built
        true
    }

    to_sql_checked!();
}

/// Decodes a returned row into a JSON object keyed by column name, in the
/// schema's declared column order.
pub fn row_to_object(
    schema: &TableSchema,
    row: &Row,
) -> Result<Map<String, Value>, ConversionError> {
    let mut object = Map::new();

    for (i, column) in schema.columns().iter().enumerate() {
        let decode = |source| ConversionError::Decode { column: column.name.clone(), source };

        let value = match column.kind {
            ColumnKind::BigInt => {
                row.try_get::<_, Option<i64>>(i).map_err(decode)?.map(Value::from)
            }
            ColumnKind::Int => row.try_get::<_, Option<i32>>(i).map_err(decode)?.map(Value::from),
            ColumnKind::SmallInt => {
                row.try_get::<_, Option<i16>>(i).map_err(decode)?.map(Value::from)
            }
            ColumnKind::Bool => row.try_get::<_, Option<bool>>(i).map_err(decode)?.map(Value::from),
            ColumnKind::Text => {
                row.try_get::<_, Option<String>>(i).map_err(decode)?.map(Value::from)
            }
            ColumnKind::Numeric => row
                .try_get::<_, Option<Decimal>>(i)
                .map_err(decode)?
                .map(|v| Value::String(v.to_string())),
            ColumnKind::Jsonb => row.try_get::<_, Option<Value>>(i).map_err(decode)?,
            ColumnKind::TimestampTz => row
                .try_get::<_, Option<DateTime<Utc>>>(i)
                .map_err(decode)?
                .map(|v| Value::String(v.to_rfc3339())),
            ColumnKind::Uuid => row
                .try_get::<_, Option<Uuid>>(i)
                .map_err(decode)?
                .map(|v| Value::String(v.to_string())),
        };

        object.insert(column.name.clone(), value.unwrap_or(Value::Null));
    }

    Ok(object)
}
