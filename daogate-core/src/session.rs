//! Session: exclusive wrapper around one live database connection.
//!
//! A `Session` is a cheap clone-able handle; all clones drive the same
//! connection through an async mutex, so operations issued against one
//! session complete in issuance order. Sessions are not meant for
//! concurrent multiplexed use; one unit of work drives a session at a
//! time, and closing a session while an operation is still in flight is a
//! caller error (close waits for the mutex, so in practice the in-flight
//! operation completes first).

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::client::{SqlClient, SqlConnection};
use crate::error::{DaoError, Result};
use crate::value::{RowSet, SqlValue, UpdateOutcome};

struct SessionInner {
    /// `None` once closed.
    conn: Option<Box<dyn SqlConnection>>,
    in_transaction: bool,
}

/// A bound, exclusive wrapper around one live database connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    /// Acquire a connection from `client`. The session starts in
    /// auto-commit mode; no transaction is opened.
    pub async fn open(client: &dyn SqlClient) -> Result<Session> {
        let conn = client.connect().await?;
        debug!("session opened");
        Ok(Session {
            inner: Arc::new(Mutex::new(SessionInner {
                conn: Some(conn),
                in_transaction: false,
            })),
        })
    }

    pub async fn execute_query(&self, sql: &str, params: &[SqlValue]) -> Result<RowSet> {
        check_arity(sql, params.len())?;
        let mut inner = self.inner.lock().await;
        let conn = inner.conn.as_mut().ok_or(DaoError::SessionClosed)?;
        conn.query(sql, params).await
    }

    pub async fn execute_update(&self, sql: &str, params: &[SqlValue]) -> Result<UpdateOutcome> {
        check_arity(sql, params.len())?;
        let mut inner = self.inner.lock().await;
        let conn = inner.conn.as_mut().ok_or(DaoError::SessionClosed)?;
        conn.update(sql, params).await
    }

    /// Insert is update with generated-key reporting; kept as a separate
    /// operation because callers read better with intent spelled out.
    pub async fn execute_insert(&self, sql: &str, params: &[SqlValue]) -> Result<UpdateOutcome> {
        self.execute_update(sql, params).await
    }

    /// Execute `sql` once per parameter set, in order. Every set is
    /// arity-checked up front; per-statement affected-row counts come back
    /// in issuance order.
    pub async fn execute_batch(
        &self,
        sql: &str,
        param_sets: &[Vec<SqlValue>],
    ) -> Result<Vec<u64>> {
        for set in param_sets {
            check_arity(sql, set.len())?;
        }
        let mut inner = self.inner.lock().await;
        let conn = inner.conn.as_mut().ok_or(DaoError::SessionClosed)?;
        conn.batch(sql, param_sets).await
    }

    /// Disable auto-commit on the underlying connection. Starting a
    /// transaction while one is active is a programming error.
    pub async fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.in_transaction {
            return Err(DaoError::TransactionActive);
        }
        let conn = inner.conn.as_mut().ok_or(DaoError::SessionClosed)?;
        conn.set_auto_commit(false)
            .await
            .map_err(|e| DaoError::transaction("begin", e.to_string()))?;
        inner.in_transaction = true;
        Ok(())
    }

    /// Commit the active transaction. Auto-commit is restored whether or
    /// not the commit succeeds: the transactional mode ends either way, so
    /// a pooled connection is never left stuck mid-transaction.
    pub async fn commit(&self) -> Result<()> {
        self.end_transaction("commit").await
    }

    /// Roll back the active transaction. Auto-commit is restored whether
    /// or not the rollback succeeds.
    pub async fn rollback(&self) -> Result<()> {
        self.end_transaction("rollback").await
    }

    async fn end_transaction(&self, op: &'static str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.in_transaction {
            return Err(DaoError::NoTransaction);
        }
        let conn = inner.conn.as_mut().ok_or(DaoError::SessionClosed)?;
        let result = match op {
            "commit" => conn.commit().await,
            _ => conn.rollback().await,
        };
        // The transaction is over from the session's point of view even if
        // the statement failed; restore auto-commit unconditionally.
        inner.in_transaction = false;
        let conn = inner.conn.as_mut().ok_or(DaoError::SessionClosed)?;
        let restore = conn.set_auto_commit(true).await;
        match result {
            Err(e) => {
                if let Err(restore_err) = restore {
                    error!(error = %restore_err, "failed to restore auto-commit after failed {op}");
                }
                Err(DaoError::transaction(op, e.to_string()))
            }
            Ok(()) => restore.map_err(|e| DaoError::transaction(op, e.to_string())),
        }
    }

    /// Release the underlying connection. Idempotent. A transaction that
    /// was never explicitly ended is rolled back first, so partial work is
    /// never silently committed.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(mut conn) = inner.conn.take() else {
            return Ok(());
        };
        let mut first_err = None;
        if inner.in_transaction {
            inner.in_transaction = false;
            match conn.rollback().await {
                Ok(()) => {
                    if let Err(e) = conn.set_auto_commit(true).await {
                        error!(error = %e, "failed to restore auto-commit while closing session");
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to roll back open transaction while closing session");
                    first_err = Some(DaoError::transaction("rollback", e.to_string()));
                }
            }
        }
        if let Err(e) = conn.close().await {
            error!(error = %e, "failed to release connection");
            first_err.get_or_insert(DaoError::connection(e.to_string()));
        }
        debug!("session closed");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.conn.is_none()
    }

    pub async fn in_transaction(&self) -> bool {
        self.inner.lock().await.in_transaction
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Count `?` placeholders outside string literals, quoted identifiers, and
/// comments, and reject a parameter-count mismatch before the statement
/// reaches the connection.
fn check_arity(sql: &str, supplied: usize) -> Result<()> {
    let expected = count_placeholders(sql);
    if expected != supplied {
        return Err(DaoError::ParameterArity {
            sql: sql.to_owned(),
            expected,
            supplied,
        });
    }
    Ok(())
}

fn count_placeholders(sql: &str) -> usize {
    #[derive(PartialEq)]
    enum State {
        Plain,
        SingleQuote,
        DoubleQuote,
        LineComment,
        BlockComment,
    }
    let mut state = State::Plain;
    let mut count = 0;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Plain => match c {
                '?' => count += 1,
                '\'' => state = State::SingleQuote,
                '"' => state = State::DoubleQuote,
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                _ => {}
            },
            State::SingleQuote => {
                // '' escapes a quote inside the literal
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                    } else {
                        state = State::Plain;
                    }
                }
            }
            State::DoubleQuote => {
                if c == '"' {
                    state = State::Plain;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Plain;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Plain;
                }
            }
        }
    }
    count
}
