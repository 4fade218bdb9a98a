//! Public-API walkthrough: manager, pools, sessions, and the cleanup
//! sweep, driven through a minimal counting client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use daogate_core::{
    Dao, DaoBase, DaoError, DaoManager, DaoTransactions, ManagerConfig, PoolConfig, Result,
    RowSet, SqlClient, SqlConnection, SqlValue, UpdateOutcome,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts live connections; every statement succeeds with empty results.
#[derive(Default)]
struct CountingClient {
    open: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

struct CountingConnection {
    open: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl SqlClient for CountingClient {
    async fn connect(&self) -> Result<Box<dyn SqlConnection>> {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingConnection {
            open: Arc::clone(&self.open),
            closed: false,
        }))
    }
}

#[async_trait]
impl SqlConnection for CountingConnection {
    async fn query(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<RowSet> {
        Ok(RowSet::default())
    }

    async fn update(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<UpdateOutcome> {
        Ok(UpdateOutcome::new(1))
    }

    async fn batch(&mut self, _sql: &str, param_sets: &[Vec<SqlValue>]) -> Result<Vec<u64>> {
        Ok(vec![1; param_sets.len()])
    }

    async fn set_auto_commit(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Default)]
struct UserDao {
    base: DaoBase,
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
    async fn example_query(&self) -> Result<RowSet> {
        self.base().query("SELECT * FROM users", &[]).await
    }
}

#[derive(Default)]
struct OrderDao {
    base: DaoBase,
}

impl Dao for OrderDao {
    fn base(&self) -> &DaoBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut DaoBase {
        &mut self.base
    }
}

#[tokio::test]
async fn borrow_use_close_roundtrip() {
    init_tracing();
    let client = CountingClient::default();
    let open = Arc::clone(&client.open);
    let manager = DaoManager::new(Arc::new(client));
    manager.register::<UserDao>();

    let unit = manager.begin_unit();
    let mut dao = unit.create_dao::<UserDao>().await.unwrap();
    dao.example_query().await.unwrap();
    assert_eq!(open.load(Ordering::SeqCst), 1);

    dao.close().await.unwrap();
    assert_eq!(open.load(Ordering::SeqCst), 0);
    unit.dispose().await;
}

#[tokio::test]
async fn failure_inside_unit_of_work_leaks_nothing() {
    init_tracing();
    let client = CountingClient::default();
    let open = Arc::clone(&client.open);
    let manager = DaoManager::new(Arc::new(client));

    let result: Result<()> = manager
        .unit_of_work(|unit| async move {
            let dao = unit.create_dao::<UserDao>().await?;
            dao.start_transaction().await?;
            dao.base()
                .update("INSERT INTO users (name) VALUES (?)", &["ada".into()])
                .await?;
            // unit of work fails before commit or close
            Err(DaoError::query("INSERT", "constraint violation"))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(
        open.load(Ordering::SeqCst),
        0,
        "sweep must release every connection"
    );
}

#[tokio::test]
async fn multi_dao_transaction_on_one_shared_session() {
    init_tracing();
    let client = CountingClient::default();
    let open = Arc::clone(&client.open);
    let opened_total = Arc::clone(&client.opened_total);
    let manager = DaoManager::new(Arc::new(client));

    manager
        .unit_of_work(|unit| async move {
            let session = unit.create_session().await?;
            let mut users = unit.create_dao_with::<UserDao>(&session).await?;
            let mut orders = unit.create_dao_with::<OrderDao>(&session).await?;

            session.begin_transaction().await?;
            users
                .base()
                .update("INSERT INTO users (name) VALUES (?)", &["ada".into()])
                .await?;
            orders
                .base()
                .update("INSERT INTO orders (user) VALUES (?)", &["ada".into()])
                .await?;
            session.commit().await?;

            users.close().await?;
            orders.close().await?;
            session.close().await?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(opened_total.load(Ordering::SeqCst), 1, "one shared session");
    assert_eq!(open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bounded_blocking_pool_hands_instances_over() {
    init_tracing();
    let client = CountingClient::default();
    let manager = DaoManager::with_config(
        Arc::new(client),
        ManagerConfig {
            pool: PoolConfig::bounded(1).blocking(),
        },
    );
    let unit = manager.begin_unit();

    let mut first = unit.create_dao::<UserDao>().await.unwrap();

    let waiter = {
        let unit = unit.clone();
        tokio::spawn(async move {
            let mut dao = unit.create_dao::<UserDao>().await.unwrap();
            dao.close().await.unwrap();
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "borrow must block while exhausted");

    first.close().await.unwrap();
    waiter.await.unwrap();
    unit.dispose().await;
}
