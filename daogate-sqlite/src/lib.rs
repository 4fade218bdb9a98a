//! SQLite backend for daogate.
//!
//! Implements the `daogate-core` client traits over an `sqlx` SQLite
//! pool. Each `connect` call checks one dedicated connection out of the
//! sqlx pool; the daogate session layer owns it until close, which hands
//! it back. Auto-commit is emulated the way the interface expects:
//! disabling it opens a transaction, commit/rollback end it, and
//! re-enabling auto-commit rolls back any transaction still open rather
//! than silently committing partial work.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, warn};

use daogate_core::{DaoError, Result, RowSet, SqlClient, SqlConnection, SqlValue, UpdateOutcome};

/// Default maximum connections for the underlying sqlx pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQL client over an sqlx SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteClient {
    pool: SqlitePool,
}

impl SqliteClient {
    /// Open a client for `url` (e.g. `sqlite:data/app.db`), creating the
    /// database file if missing.
    pub async fn open(url: &str) -> Result<Self> {
        Self::open_with_options(url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open a client with an explicit connection limit.
    pub async fn open_with_options(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DaoError::connection(format!("{url}: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DaoError::connection(format!("{url}: {e}")))?;
        debug!(url, max_connections, "opened sqlite client");
        Ok(Self { pool })
    }

    /// In-memory database, pinned to a single pooled connection: every
    /// `sqlite::memory:` connection is a distinct database, so more than
    /// one would not see the same data.
    pub async fn in_memory() -> Result<Self> {
        Self::open_with_options("sqlite::memory:", 1).await
    }

    /// The underlying sqlx pool (for schema setup and such).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SqlClient for SqliteClient {
    async fn connect(&self) -> Result<Box<dyn SqlConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DaoError::connection(e.to_string()))?;
        Ok(Box::new(PooledSqliteConnection {
            conn: Some(conn),
            in_transaction: false,
        }))
    }
}

/// One checked-out connection.
struct PooledSqliteConnection {
    /// `None` once released back to the sqlx pool.
    conn: Option<PoolConnection<Sqlite>>,
    in_transaction: bool,
}

impl PooledSqliteConnection {
    fn conn(&mut self) -> Result<&mut PoolConnection<Sqlite>> {
        self.conn
            .as_mut()
            .ok_or_else(|| DaoError::connection("connection already released"))
    }

    async fn execute_plain(&mut self, sql: &'static str, op: &'static str) -> Result<()> {
        let conn = self.conn()?;
        sqlx::query(sql)
            .execute(&mut **conn)
            .await
            .map(|_| ())
            .map_err(|e| DaoError::transaction(op, e.to_string()))
    }
}

#[async_trait]
impl SqlConnection for PooledSqliteConnection {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet> {
        let conn = self.conn()?;
        let mut q = sqlx::query(sql);
        for param in params {
            q = bind_value(q, param);
        }
        let rows = q
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| DaoError::query(sql, e.to_string()))?;
        rows_to_rowset(sql, &rows)
    }

    async fn update(&mut self, sql: &str, params: &[SqlValue]) -> Result<UpdateOutcome> {
        let conn = self.conn()?;
        let mut q = sqlx::query(sql);
        for param in params {
            q = bind_value(q, param);
        }
        let result = q
            .execute(&mut **conn)
            .await
            .map_err(|e| DaoError::query(sql, e.to_string()))?;
        let generated_keys = match result.last_insert_rowid() {
            0 => Vec::new(),
            rowid => vec![SqlValue::Int(rowid)],
        };
        Ok(UpdateOutcome::with_keys(result.rows_affected(), generated_keys))
    }

    async fn batch(&mut self, sql: &str, param_sets: &[Vec<SqlValue>]) -> Result<Vec<u64>> {
        let conn = self.conn()?;
        let mut counts = Vec::with_capacity(param_sets.len());
        for set in param_sets {
            let mut q = sqlx::query(sql);
            for param in set {
                q = bind_value(q, param);
            }
            let result = q
                .execute(&mut **conn)
                .await
                .map_err(|e| DaoError::query(sql, e.to_string()))?;
            counts.push(result.rows_affected());
        }
        Ok(counts)
    }

    async fn set_auto_commit(&mut self, on: bool) -> Result<()> {
        if on {
            if self.in_transaction {
                // never silently commit partial work
                self.execute_plain("ROLLBACK", "rollback").await?;
                self.in_transaction = false;
                warn!("auto-commit restored with a transaction still open; rolled back");
            }
        } else if !self.in_transaction {
            self.execute_plain("BEGIN", "begin").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.execute_plain("COMMIT", "commit").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.execute_plain("ROLLBACK", "rollback").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if self.in_transaction {
            self.in_transaction = false;
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                warn!(error = %e, "rollback on close failed");
            }
        }
        // dropping the PoolConnection hands it back to the sqlx pool
        drop(conn);
        Ok(())
    }
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => q.bind(Option::<i64>::None),
        SqlValue::Bool(b) => q.bind(*b),
        SqlValue::Int(i) => q.bind(*i),
        SqlValue::Float(f) => q.bind(*f),
        SqlValue::Text(s) => q.bind(s.clone()),
        SqlValue::Bytes(b) => q.bind(b.clone()),
    }
}

fn rows_to_rowset(context: &str, rows: &[SqliteRow]) -> Result<RowSet> {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_owned()).collect())
        .unwrap_or_default();
    let mut set = RowSet::new(columns);
    for row in rows {
        let mut values = Vec::with_capacity(row.len());
        for index in 0..row.len() {
            values.push(decode_value(context, row, index)?);
        }
        set.push_row(values);
    }
    Ok(set)
}

/// Decode one column by its declared type; anything unrecognized falls
/// back to text, which SQLite can always produce. The declared type comes
/// from the column (the value itself only reports its storage class, which
/// would turn booleans into integers).
fn decode_value(context: &str, row: &SqliteRow, index: usize) -> Result<SqlValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| DaoError::query(context, e.to_string()))?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    drop(raw);
    let type_name = row.columns()[index].type_info().name().to_owned();
    let decode_err = |e: sqlx::Error| DaoError::query(context, e.to_string());
    match type_name.as_str() {
        "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => {
            Ok(SqlValue::Int(row.try_get(index).map_err(decode_err)?))
        }
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
            Ok(SqlValue::Float(row.try_get(index).map_err(decode_err)?))
        }
        "BOOLEAN" | "BOOL" => Ok(SqlValue::Bool(row.try_get(index).map_err(decode_err)?)),
        "BLOB" => Ok(SqlValue::Bytes(row.try_get(index).map_err(decode_err)?)),
        _ => Ok(SqlValue::Text(row.try_get(index).map_err(decode_err)?)),
    }
}
