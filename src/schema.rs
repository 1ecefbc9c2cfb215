use serde_json::Value;

use crate::helpers::{is_valid_identifier, is_valid_table_name};

/// Column types the engine knows how to move between JSON payloads and
/// postgres. Anything outside this set belongs in a JSONB column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    BigInt,
    Int,
    SmallInt,
    Bool,
    Text,
    Numeric,
    Jsonb,
    TimestampTz,
    Uuid,
}

impl ColumnKind {
    /// Returns the postgres type string used for placeholder casts.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnKind::BigInt => "BIGINT",
            ColumnKind::Int => "INTEGER",
            ColumnKind::SmallInt => "SMALLINT",
            ColumnKind::Bool => "BOOL",
            ColumnKind::Text => "TEXT",
            ColumnKind::Numeric => "NUMERIC",
            ColumnKind::Jsonb => "JSONB",
            ColumnKind::TimestampTz => "TIMESTAMPTZ",
            ColumnKind::Uuid => "UUID",
        }
    }
}

/// Definition of a single column in a logical table.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Applied when an insert entry omits the field. Never consulted on
    /// update - absent update fields keep the current row's value.
    pub insert_default: Option<Value>,
}

/// Creates a column definition.
pub fn column(name: &str, kind: ColumnKind) -> ColumnDefinition {
    ColumnDefinition { name: name.to_string(), kind, nullable: false, insert_default: None }
}

impl ColumnDefinition {
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_insert_default(mut self, value: Value) -> Self {
        self.insert_default = Some(value);
        self
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumnName(String),

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Identifier column not in column list: {0}")]
    UnknownIdentifierColumn(String),

    #[error("Identifier column must be BIGINT: {0}")]
    IdentifierColumnNotBigInt(String),
}

/// The declarative shape of one logical table: its name, identifier column
/// and ordered column definitions. Hand-partitioned physical tables sharing
/// this shape are registered on the engine and routed to per call.
#[derive(Debug, Clone)]
pub struct TableSchema {
    table_name: String,
    id_column: String,
    columns: Vec<ColumnDefinition>,
}

impl TableSchema {
    /// Builds a schema, rejecting anything that could not be safely
    /// interpolated as an identifier later on.
    pub fn new(
        table_name: &str,
        id_column: &str,
        columns: Vec<ColumnDefinition>,
    ) -> Result<Self, SchemaError> {
        if !is_valid_table_name(table_name) {
            return Err(SchemaError::InvalidTableName(table_name.to_string()));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(columns.len());
        for column in &columns {
            if !is_valid_identifier(&column.name) {
                return Err(SchemaError::InvalidColumnName(column.name.clone()));
            }
            if seen.contains(&column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
            seen.push(column.name.as_str());
        }

        let id = columns.iter().find(|c| c.name == id_column);
        match id {
            None => Err(SchemaError::UnknownIdentifierColumn(id_column.to_string())),
            Some(c) if c.kind != ColumnKind::BigInt => {
                Err(SchemaError::IdentifierColumnNotBigInt(id_column.to_string()))
            }
            Some(_) => Ok(TableSchema {
                table_name: table_name.to_string(),
                id_column: id_column.to_string(),
                columns,
            }),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// All columns except the identifier, in declaration order.
    pub fn data_columns(&self) -> impl Iterator<Item = &ColumnDefinition> + '_ {
        self.columns.iter().filter(move |c| c.name != self.id_column)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn users_columns() -> Vec<ColumnDefinition> {
        vec![
            column("id", ColumnKind::BigInt),
            column("name", ColumnKind::Text),
            column("is_admin", ColumnKind::Bool).with_insert_default(json!(false)),
        ]
    }

    #[test]
    fn test_schema_accepts_valid_definition() {
        let schema = TableSchema::new("users", "id", users_columns()).unwrap();
        assert_eq!(schema.table_name(), "users");
        assert_eq!(schema.id_column(), "id");
        assert_eq!(schema.columns().len(), 3);

        let data: Vec<&str> = schema.data_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(data, vec!["name", "is_admin"]);
    }

    #[test]
    fn test_schema_rejects_bad_table_name() {
        let result = TableSchema::new("users; drop table users", "id", users_columns());
        assert!(matches!(result, Err(SchemaError::InvalidTableName(_))));
    }

    #[test]
    fn test_schema_rejects_bad_column_name() {
        let mut columns = users_columns();
        columns.push(column("Full Name", ColumnKind::Text));
        let result = TableSchema::new("users", "id", columns);
        assert!(matches!(result, Err(SchemaError::InvalidColumnName(_))));
    }

    #[test]
    fn test_schema_rejects_duplicate_column() {
        let mut columns = users_columns();
        columns.push(column("name", ColumnKind::Text));
        let result = TableSchema::new("users", "id", columns);
        assert!(matches!(result, Err(SchemaError::DuplicateColumn(_))));
    }

    #[test]
    fn test_schema_rejects_unknown_identifier_column() {
        let result = TableSchema::new("users", "user_id", users_columns());
        assert!(matches!(result, Err(SchemaError::UnknownIdentifierColumn(_))));
    }

    #[test]
    fn test_schema_rejects_non_bigint_identifier() {
        let columns = vec![column("id", ColumnKind::Text), column("name", ColumnKind::Text)];
        let result = TableSchema::new("users", "id", columns);
        assert!(matches!(result, Err(SchemaError::IdentifierColumnNotBigInt(_))));
    }

    #[test]
    fn test_column_kind_sql_names() {
        assert_eq!(ColumnKind::BigInt.sql_name(), "BIGINT");
        assert_eq!(ColumnKind::Numeric.sql_name(), "NUMERIC");
        assert_eq!(ColumnKind::Jsonb.sql_name(), "JSONB");
        assert_eq!(ColumnKind::TimestampTz.sql_name(), "TIMESTAMPTZ");
    }
}
