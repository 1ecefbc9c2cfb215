mod database;
pub use database::postgres::{
    client::{
        connection_string, PoolConnection, PostgresClient, PostgresConnectionError, PostgresError,
    },
    query_builder::{format_table_name, quote_identifier},
    sql_value::{row_to_object, ConversionError, SqlValue},
};

mod engine;
pub use engine::{
    payload::{Payload, PayloadError, UpsertEntry},
    EngineError, RoutingOptions, UpsertEngine,
};

mod schema;
pub use schema::{column, ColumnDefinition, ColumnKind, SchemaError, TableSchema};

mod helpers;
pub use helpers::{is_valid_identifier, is_valid_table_name, load_env_from_path, LoadEnvError};

mod logger;
pub use logger::{setup_info_logger, setup_logger};

// export 3rd party dependencies
pub use serde_json::Value as JsonValue;
pub use tokio_postgres::types::{ToSql, Type as PgType};
pub use tokio_postgres::Transaction as PgTransaction;
