//! Scripted in-memory client for unit tests.
//!
//! Records every connection-level operation in a journal and fails on cue,
//! so session/manager tests can assert ordering, auto-commit handling, and
//! cleanup behavior without a real database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::{SqlClient, SqlConnection};
use crate::error::{DaoError, Result};
use crate::value::{RowSet, SqlValue, UpdateOutcome};

#[derive(Default)]
struct MockState {
    journal: Vec<String>,
    fail_on: Vec<String>,
    canned_queries: Vec<(String, RowSet)>,
    fail_connect: bool,
}

/// Shared scripted client. Clone-able; all clones share one journal.
#[derive(Clone, Default)]
pub(crate) struct MockClient {
    state: Arc<Mutex<MockState>>,
    open: Arc<AtomicUsize>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `connect` calls fail.
    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().unwrap().fail_connect = fail;
    }

    /// Fail any operation whose journal entry starts with `needle`
    /// (e.g. `"commit"`, `"update:DELETE"`).
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on.push(needle.to_owned());
    }

    /// Stop failing operations matching `needle`.
    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_on.clear();
    }

    /// Return `rows` for queries whose SQL contains `needle`.
    pub fn on_query(&self, needle: &str, rows: RowSet) {
        self.state
            .lock()
            .unwrap()
            .canned_queries
            .push((needle.to_owned(), rows));
    }

    pub fn journal(&self) -> Vec<String> {
        self.state.lock().unwrap().journal.clone()
    }

    /// Connections acquired and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlClient for MockClient {
    async fn connect(&self) -> Result<Box<dyn SqlConnection>> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_connect {
                state.journal.push("connect:failed".into());
                return Err(DaoError::connection("scripted connect failure"));
            }
            state.journal.push("connect".into());
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            open: Arc::clone(&self.open),
            closed: false,
        }))
    }
}

pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
    open: Arc<AtomicUsize>,
    closed: bool,
}

impl MockConnection {
    /// Journal the op; fail if scripted to. Returns the canned rows for a
    /// matching query, if any.
    fn record(&self, entry: String) -> Result<Option<RowSet>> {
        let mut state = self.state.lock().unwrap();
        let failed = state.fail_on.iter().any(|n| entry.starts_with(n.as_str()));
        if failed {
            state.journal.push(format!("{entry}:failed"));
            return Err(DaoError::query(entry, "scripted failure"));
        }
        let canned = state
            .canned_queries
            .iter()
            .find(|(n, _)| entry.contains(n.as_str()))
            .map(|(_, rows)| rows.clone());
        state.journal.push(entry);
        Ok(canned)
    }
}

#[async_trait]
impl SqlConnection for MockConnection {
    async fn query(&mut self, sql: &str, _params: &[SqlValue]) -> Result<RowSet> {
        let canned = self.record(format!("query:{sql}"))?;
        Ok(canned.unwrap_or_default())
    }

    async fn update(&mut self, sql: &str, _params: &[SqlValue]) -> Result<UpdateOutcome> {
        self.record(format!("update:{sql}"))?;
        Ok(UpdateOutcome::with_keys(1, vec![SqlValue::Int(1)]))
    }

    async fn batch(&mut self, sql: &str, param_sets: &[Vec<SqlValue>]) -> Result<Vec<u64>> {
        self.record(format!("batch:{sql}"))?;
        Ok(vec![1; param_sets.len()])
    }

    async fn set_auto_commit(&mut self, on: bool) -> Result<()> {
        self.record(format!("set_auto_commit:{on}"))?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.record("commit".into())?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.record("rollback".into())?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.record("close".into())?;
        Ok(())
    }
}
