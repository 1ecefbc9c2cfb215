//! The batch upsert/delete engine: JSON in, affected rows out, one atomic
//! transaction per call.

pub mod merge;
pub mod payload;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Transaction;
use tracing::{debug, error};

use crate::database::postgres::client::{PostgresClient, PostgresError};
use crate::database::postgres::query_builder::{
    build_delete, build_lock_select, build_upsert, NEXTVAL_SQL,
};
use crate::database::postgres::sql_value::{row_to_object, ConversionError};
use crate::engine::merge::{merge_for_insert, merge_for_update};
use crate::engine::payload::{
    normalize_delete, normalize_upsert, Payload, PayloadError, UpsertEntry,
};
use crate::helpers::is_valid_table_name;
use crate::schema::TableSchema;

/// Per-call selection of which physical table the call targets, for
/// hand-partitioned table sets sharing one logical schema.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoutingOptions {
    pub table_name: String,
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Invalid payload: {0}")]
    Validation(String),

    #[error("Row {id} not found in {table}")]
    RowNotFound { table: String, id: i64 },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(tokio_postgres::Error),

    #[error("Lock wait timed out: {0}")]
    Timeout(tokio_postgres::Error),

    #[error("Routing rejected table name: {0}")]
    Routing(String),

    #[error("{0}")]
    Postgres(#[from] PostgresError),
}

impl From<PayloadError> for EngineError {
    fn from(error: PayloadError) -> Self {
        EngineError::Validation(error.to_string())
    }
}

impl From<ConversionError> for EngineError {
    fn from(error: ConversionError) -> Self {
        EngineError::Validation(error.to_string())
    }
}

/// Maps driver errors onto the engine taxonomy: lock wait timeouts and
/// store-level constraint rejections get their own variants, everything else
/// surfaces as a driver fault.
fn classify_pg_error(error: tokio_postgres::Error) -> EngineError {
    let code = error.as_db_error().map(|db_error| db_error.code().code().to_string());
    match code.as_deref() {
        Some(code) if code == SqlState::LOCK_NOT_AVAILABLE.code() => EngineError::Timeout(error),
        Some(code) if code.starts_with("23") => EngineError::ConstraintViolation(error),
        _ => EngineError::Postgres(PostgresError::PgError(error)),
    }
}

fn lock_timeout_clause(lock_timeout: Duration) -> String {
    format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis())
}

/// The allow-list of physical tables a call may be routed to. The engine's
/// own table is always allowed; everything else must be registered up front.
#[derive(Debug, Clone)]
struct TableRouter {
    default_table: String,
    routed_tables: Vec<String>,
}

impl TableRouter {
    fn new(default_table: &str) -> Self {
        TableRouter { default_table: default_table.to_string(), routed_tables: Vec::new() }
    }

    fn register(&mut self, table_name: &str) -> Result<(), EngineError> {
        if !is_valid_table_name(table_name) {
            return Err(EngineError::Routing(format!("not a valid identifier: {table_name}")));
        }
        if !self.routed_tables.iter().any(|t| t == table_name) {
            self.routed_tables.push(table_name.to_string());
        }
        Ok(())
    }

    fn resolve<'a>(&'a self, options: Option<&'a RoutingOptions>) -> Result<&'a str, EngineError> {
        let Some(options) = options else {
            return Ok(&self.default_table);
        };
        let table_name = options.table_name.as_str();

        if !is_valid_table_name(table_name) {
            return Err(EngineError::Routing(format!("not a valid identifier: {table_name}")));
        }
        if table_name != self.default_table && !self.routed_tables.iter().any(|t| t == table_name)
        {
            return Err(EngineError::Routing(format!("not a registered table: {table_name}")));
        }

        Ok(table_name)
    }
}

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// The batch upsert/delete engine for one logical table.
///
/// Every call is one atomic transaction: each entry either inserts a new row
/// (identifier allocated from the table's sequence) or updates an existing
/// one under a `FOR UPDATE` row lock, and any failure rolls the whole call
/// back. Affected rows come back in payload order.
pub struct UpsertEngine {
    client: PostgresClient,
    schema: TableSchema,
    router: TableRouter,
    lock_timeout: Duration,
}

impl UpsertEngine {
    pub fn new(client: PostgresClient, schema: TableSchema) -> Self {
        let router = TableRouter::new(schema.table_name());
        UpsertEngine { client, schema, router, lock_timeout: DEFAULT_LOCK_TIMEOUT }
    }

    /// Bounds how long an update entry waits on another caller's row lock
    /// before the call fails with [`EngineError::Timeout`].
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Adds a physical table to the routing allow-list. The table must share
    /// the engine's logical schema.
    pub fn register_table(&mut self, table_name: &str) -> Result<(), EngineError> {
        self.router.register(table_name)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Inserts or updates the payload's rows in one atomic transaction and
    /// returns the written rows in payload order.
    pub async fn upsert(
        &self,
        payload: impl Into<Payload>,
        options: Option<&RoutingOptions>,
    ) -> Result<Vec<Value>, EngineError> {
        let entries = normalize_upsert(payload.into(), &self.schema)?;
        let table_name = self.router.resolve(options)?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.client.connection().await?;
        let transaction = conn.transaction().await.map_err(classify_pg_error)?;
        self.apply_lock_timeout(&transaction).await?;

        match self.run_upsert(&transaction, table_name, entries).await {
            Ok(written) => {
                transaction.commit().await.map_err(classify_pg_error)?;
                Ok(written)
            }
            Err(e) => {
                // dropping the transaction rolls it back
                error!("Upsert batch against {} failed, rolling back: {}", table_name, e);
                Err(e)
            }
        }
    }

    /// Like [`UpsertEngine::upsert`] but runs inside a caller-owned
    /// transaction; the caller keeps begin/commit/rollback responsibility.
    pub async fn upsert_in(
        &self,
        transaction: &Transaction<'_>,
        payload: impl Into<Payload>,
        options: Option<&RoutingOptions>,
    ) -> Result<Vec<Value>, EngineError> {
        let entries = normalize_upsert(payload.into(), &self.schema)?;
        let table_name = self.router.resolve(options)?;
        self.run_upsert(transaction, table_name, entries).await
    }

    /// Deletes the payload's rows in one atomic transaction and returns them,
    /// as they existed immediately before removal, in payload order.
    pub async fn delete(
        &self,
        payload: impl Into<Payload>,
        options: Option<&RoutingOptions>,
    ) -> Result<Vec<Value>, EngineError> {
        let ids = normalize_delete(payload.into(), &self.schema)?;
        let table_name = self.router.resolve(options)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.client.connection().await?;
        let transaction = conn.transaction().await.map_err(classify_pg_error)?;
        self.apply_lock_timeout(&transaction).await?;

        match self.run_delete(&transaction, table_name, ids).await {
            Ok(deleted) => {
                transaction.commit().await.map_err(classify_pg_error)?;
                Ok(deleted)
            }
            Err(e) => {
                error!("Delete batch against {} failed, rolling back: {}", table_name, e);
                Err(e)
            }
        }
    }

    /// Like [`UpsertEngine::delete`] but runs inside a caller-owned
    /// transaction.
    pub async fn delete_in(
        &self,
        transaction: &Transaction<'_>,
        payload: impl Into<Payload>,
        options: Option<&RoutingOptions>,
    ) -> Result<Vec<Value>, EngineError> {
        let ids = normalize_delete(payload.into(), &self.schema)?;
        let table_name = self.router.resolve(options)?;
        self.run_delete(transaction, table_name, ids).await
    }

    async fn apply_lock_timeout(&self, transaction: &Transaction<'_>) -> Result<(), EngineError> {
        // SET LOCAL takes no bound parameters; the value is engine
        // configuration, never caller input.
        let clause = lock_timeout_clause(self.lock_timeout);
        transaction.batch_execute(&clause).await.map_err(classify_pg_error)?;
        Ok(())
    }

    async fn run_upsert(
        &self,
        transaction: &Transaction<'_>,
        table_name: &str,
        entries: Vec<UpsertEntry>,
    ) -> Result<Vec<Value>, EngineError> {
        let lock_sql = build_lock_select(&self.schema, table_name);
        let upsert_sql = build_upsert(&self.schema, table_name);
        debug!("Upsert statement: {}", upsert_sql);

        let mut written = Vec::with_capacity(entries.len());

        for entry in entries {
            let merged = match entry.id {
                None => {
                    let id = self.next_identifier(transaction, table_name).await?;
                    merge_for_insert(&self.schema, id, &entry.fields)?
                }
                Some(id) => {
                    let row = transaction
                        .query_opt(&lock_sql, &[&id])
                        .await
                        .map_err(classify_pg_error)?;
                    let Some(row) = row else {
                        return Err(EngineError::RowNotFound {
                            table: table_name.to_string(),
                            id,
                        });
                    };
                    let current = row_to_object(&self.schema, &row)?;
                    merge_for_update(&self.schema, id, &entry.fields, &current)?
                }
            };

            let params: Vec<&(dyn ToSql + Sync)> =
                merged.iter().map(|value| value as &(dyn ToSql + Sync)).collect();
            let row = transaction
                .query_one(&upsert_sql, &params)
                .await
                .map_err(classify_pg_error)?;
            written.push(Value::Object(row_to_object(&self.schema, &row)?));
        }

        Ok(written)
    }

    async fn run_delete(
        &self,
        transaction: &Transaction<'_>,
        table_name: &str,
        ids: Vec<i64>,
    ) -> Result<Vec<Value>, EngineError> {
        let delete_sql = build_delete(&self.schema, table_name);
        debug!("Delete statement: {}", delete_sql);

        let mut deleted = Vec::with_capacity(ids.len());

        for id in ids {
            let row = transaction
                .query_opt(&delete_sql, &[&id])
                .await
                .map_err(classify_pg_error)?;
            match row {
                None => {
                    return Err(EngineError::RowNotFound { table: table_name.to_string(), id })
                }
                Some(row) => deleted.push(Value::Object(row_to_object(&self.schema, &row)?)),
            }
        }

        Ok(deleted)
    }

    /// Allocates the next identifier for an insert entry. Surfaces a driver
    /// error for tables whose identifier column has no backing sequence.
    async fn next_identifier(
        &self,
        transaction: &Transaction<'_>,
        table_name: &str,
    ) -> Result<i64, EngineError> {
        let id_column = self.schema.id_column();
        let row = transaction
            .query_one(NEXTVAL_SQL, &[&table_name, &id_column])
            .await
            .map_err(classify_pg_error)?;
        let id: i64 =
            row.try_get(0).map_err(|e| EngineError::Postgres(PostgresError::PgError(e)))?;
        Ok(id)
    }
}
