//! Narrow interface to the underlying SQL execution engine.
//!
//! daogate never talks to a database driver directly; it consumes these two
//! traits. An adapter crate (e.g. `daogate-sqlite`) implements them over a
//! real driver. Statements use `?` placeholders; adapters translate if
//! their driver expects a different style.

use async_trait::async_trait;

use crate::error::Result;
use crate::value::{RowSet, SqlValue, UpdateOutcome};

/// Hands out connections. Implementations are typically a thin wrapper
/// around a driver-level connection pool and are shared behind an `Arc`.
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Acquire one connection. Failure is a connection error.
    async fn connect(&self) -> Result<Box<dyn SqlConnection>>;
}

/// One live connection. All operations run on the calling task and complete
/// in issuance order; the connection is a single stream.
///
/// Implementations start in auto-commit mode. `set_auto_commit(false)`
/// opens a transaction; `commit`/`rollback` end it. Re-enabling auto-commit
/// while a transaction is still open must not silently commit partial work.
#[async_trait]
pub trait SqlConnection: Send {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet>;

    async fn update(&mut self, sql: &str, params: &[SqlValue]) -> Result<UpdateOutcome>;

    /// Execute the same statement once per parameter set, in order,
    /// returning per-statement affected-row counts.
    async fn batch(&mut self, sql: &str, param_sets: &[Vec<SqlValue>]) -> Result<Vec<u64>>;

    async fn set_auto_commit(&mut self, on: bool) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Release the connection. Closing an already-closed connection is a
    /// no-op, not an error.
    async fn close(&mut self) -> Result<()>;
}
