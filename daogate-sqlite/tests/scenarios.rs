//! End-to-end walkthroughs of the manager/session/transaction protocol
//! against real SQLite databases.

use std::sync::Arc;

use daogate_core::{
    Dao, DaoBase, DaoError, DaoManager, DaoTransactions, ManagerConfig, PoolConfig, Result,
    RowSet, SqlValue, UpdateOutcome,
};
use daogate_sqlite::SqliteClient;

#[derive(Default)]
struct UserDao {
    base: DaoBase,
    // plain per-instance state, used to observe pooling
    touched: u32,
}

impl Dao for UserDao {
    fn base(&self) -> &DaoBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut DaoBase {
        &mut self.base
    }
}

impl UserDao {
    async fn all_users(&self) -> Result<RowSet> {
        self.base().query("SELECT id, name FROM users", &[]).await
    }

    async fn add_user(&self, name: &str) -> Result<UpdateOutcome> {
        self.base()
            .insert("INSERT INTO users (name) VALUES (?)", &[name.into()])
            .await
    }

    async fn delete_user(&self, name: &str) -> Result<UpdateOutcome> {
        self.base()
            .update("DELETE FROM users WHERE name = ?", &[name.into()])
            .await
    }

    async fn count(&self) -> Result<i64> {
        let rows = self
            .base()
            .query("SELECT COUNT(*) AS n FROM users", &[])
            .await?;
        Ok(rows.rows()[0].get_named("n").and_then(|v| v.as_i64()).unwrap_or(0))
    }
}

#[derive(Default)]
struct AuditDao {
    base: DaoBase,
}

impl Dao for AuditDao {
    fn base(&self) -> &DaoBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut DaoBase {
        &mut self.base
    }
}

impl AuditDao {
    async fn record(&self, message: &str) -> Result<UpdateOutcome> {
        self.base()
            .insert("INSERT INTO audit (message) VALUES (?)", &[message.into()])
            .await
    }

    /// Intentionally broken operation: the table has no such column.
    async fn record_broken(&self, message: &str) -> Result<UpdateOutcome> {
        self.base()
            .insert("INSERT INTO audit (nope) VALUES (?)", &[message.into()])
            .await
    }

    async fn count(&self) -> Result<i64> {
        let rows = self
            .base()
            .query("SELECT COUNT(*) AS n FROM audit", &[])
            .await?;
        Ok(rows.rows()[0].get_named("n").and_then(|v| v.as_i64()).unwrap_or(0))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn memory_manager() -> (DaoManager, SqliteClient) {
    init_tracing();
    let client = SqliteClient::in_memory().await.unwrap();
    sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")
        .execute(client.pool())
        .await
        .unwrap();
    sqlx::query("CREATE TABLE audit (id INTEGER PRIMARY KEY AUTOINCREMENT, message TEXT NOT NULL)")
        .execute(client.pool())
        .await
        .unwrap();
    (DaoManager::new(Arc::new(client.clone())), client)
}

#[tokio::test]
async fn scenario_a_query_close_and_reuse() {
    let (manager, _client) = memory_manager().await;
    manager.register::<UserDao>();
    let unit = manager.begin_unit();

    let mut dao = unit.create_dao::<UserDao>().await.unwrap();
    dao.add_user("ada").await.unwrap();
    let rows = dao.all_users().await.unwrap();
    assert_eq!(rows.num_rows(), 1);
    assert_eq!(rows.rows()[0].get_named("name"), Some(&SqlValue::Text("ada".into())));

    dao.touched = 1;
    dao.close().await.unwrap();

    // the second borrow reuses the pooled instance, not a fresh allocation
    let mut dao = unit.create_dao::<UserDao>().await.unwrap();
    assert_eq!(dao.touched, 1);
    let rows = dao.all_users().await.unwrap();
    assert_eq!(rows.num_rows(), 1);
    dao.close().await.unwrap();
    unit.dispose().await;
}

#[tokio::test]
async fn scenario_b_rollback_discards_the_insert() {
    let (manager, _client) = memory_manager().await;
    let unit = manager.begin_unit();

    let mut dao = unit.create_dao::<UserDao>().await.unwrap();
    dao.start_transaction().await.unwrap();
    dao.add_user("ada").await.unwrap();

    // the failing step: this statement is invalid
    let err = dao
        .base()
        .update("DELETE FROM no_such_table WHERE name = ?", &["ada".into()])
        .await
        .unwrap_err();
    assert!(err.is_query_error());

    dao.rollback().await.unwrap();
    assert_eq!(dao.count().await.unwrap(), 0, "insert must not survive rollback");
    dao.close().await.unwrap();
    unit.dispose().await;
}

#[tokio::test]
async fn scenario_b_commit_persists_across_sessions() {
    let (manager, _client) = memory_manager().await;
    let unit = manager.begin_unit();

    let mut dao = unit.create_dao::<UserDao>().await.unwrap();
    dao.start_transaction().await.unwrap();
    dao.add_user("ada").await.unwrap();
    dao.delete_user("nobody").await.unwrap();
    dao.commit().await.unwrap();
    dao.close().await.unwrap();

    let mut dao = unit.create_dao::<UserDao>().await.unwrap();
    assert_eq!(dao.count().await.unwrap(), 1);
    dao.close().await.unwrap();
    unit.dispose().await;
}

#[tokio::test]
async fn scenario_c_shared_session_rollback_spans_both_daos() {
    let (manager, _client) = memory_manager().await;
    let unit = manager.begin_unit();

    let session = unit.create_session().await.unwrap();
    let mut users = unit.create_dao_with::<UserDao>(&session).await.unwrap();
    let mut audit = unit.create_dao_with::<AuditDao>(&session).await.unwrap();

    session.begin_transaction().await.unwrap();
    users.add_user("ada").await.unwrap();
    let err = audit.record_broken("added ada").await.unwrap_err();
    assert!(err.is_query_error());
    session.rollback().await.unwrap();

    // neither effect persists, and both DAOs stay usable
    assert_eq!(users.count().await.unwrap(), 0);
    assert_eq!(audit.count().await.unwrap(), 0);
    users.add_user("grace").await.unwrap();
    audit.record("added grace").await.unwrap();
    assert_eq!(users.count().await.unwrap(), 1);
    assert_eq!(audit.count().await.unwrap(), 1);

    users.close().await.unwrap();
    audit.close().await.unwrap();
    session.close().await.unwrap();
    unit.dispose().await;
}

#[tokio::test]
async fn exclusive_session_closes_with_its_dao() {
    let (manager, _client) = memory_manager().await;
    let unit = manager.begin_unit();

    let mut dao = unit.create_dao::<UserDao>().await.unwrap();
    let session = dao.base().session_handle().unwrap();
    dao.close().await.unwrap();

    assert!(session.is_closed().await);
    let err = session.execute_query("SELECT 1", &[]).await.unwrap_err();
    assert!(err.is_connection_error());
    unit.dispose().await;
}

#[tokio::test]
async fn bounded_pool_fails_fast_when_exhausted() {
    let client = SqliteClient::open_with_options("sqlite::memory:", 2)
        .await
        .unwrap();
    let manager = DaoManager::with_config(
        Arc::new(client),
        ManagerConfig {
            pool: PoolConfig::bounded(1),
        },
    );
    let unit = manager.begin_unit();

    let mut held = unit.create_dao::<UserDao>().await.unwrap();
    let err = unit.create_dao::<UserDao>().await.unwrap_err();
    assert!(matches!(err, DaoError::PoolExhausted { limit: 1, .. }));

    held.close().await.unwrap();
    let mut dao = unit.create_dao::<UserDao>().await.unwrap();
    dao.close().await.unwrap();
    unit.dispose().await;
}

#[tokio::test]
async fn independent_sessions_on_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("scenarios.db").display());
    let client = SqliteClient::open(&url).await.unwrap();
    sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")
        .execute(client.pool())
        .await
        .unwrap();
    let manager = DaoManager::new(Arc::new(client));
    let unit = manager.begin_unit();

    // two live sessions at once; the uncommitted insert on the first is
    // invisible to the second and dies with the sweep
    let first = unit.create_session().await.unwrap();
    let second = unit.create_session().await.unwrap();
    first.begin_transaction().await.unwrap();
    first
        .execute_insert("INSERT INTO users (name) VALUES (?)", &["ada".into()])
        .await
        .unwrap();

    let rows = second
        .execute_query("SELECT COUNT(*) AS n FROM users", &[])
        .await
        .unwrap();
    assert_eq!(rows.rows()[0].get_named("n").and_then(|v| v.as_i64()), Some(0));

    unit.dispose().await;

    let third = manager.create_session().await.unwrap();
    let rows = third
        .execute_query("SELECT COUNT(*) AS n FROM users", &[])
        .await
        .unwrap();
    assert_eq!(
        rows.rows()[0].get_named("n").and_then(|v| v.as_i64()),
        Some(0),
        "swept transaction must have rolled back"
    );
    third.close().await.unwrap();
}
