//! The manager: single entry point that borrows DAO instances, attaches
//! them to sessions, and reclaims them.
//!
//! `DaoManager` is a cheap clone-able handle; one manager (and its pools)
//! is shared across many concurrently executing units of work. DAO
//! creation happens through a [`UnitOfWork`](crate::unit::UnitOfWork) so
//! every session opened on behalf of a caller carries a cleanup
//! obligation.

use std::sync::Arc;

use tracing::debug;

use crate::client::SqlClient;
use crate::config::ManagerConfig;
use crate::dao::{Dao, DaoHandle};
use crate::error::{DaoError, Result};
use crate::pool::PoolMap;
use crate::session::Session;
use crate::unit::UnitOfWork;

struct ManagerInner {
    client: Arc<dyn SqlClient>,
    pools: PoolMap,
}

/// Coordinates DAO borrowing, session binding, and cleanup tracking.
#[derive(Clone)]
pub struct DaoManager {
    inner: Arc<ManagerInner>,
}

impl DaoManager {
    pub fn new(client: Arc<dyn SqlClient>) -> Self {
        Self::with_config(client, ManagerConfig::default())
    }

    pub fn with_config(client: Arc<dyn SqlClient>, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                client,
                pools: PoolMap::new(config.pool),
            }),
        }
    }

    /// Pre-create the pool for `T` so the first borrow skips pool setup.
    /// Optional and idempotent.
    pub fn register<T: Dao>(&self) {
        self.inner.pools.ensure::<T>();
        debug!(dao_type = std::any::type_name::<T>(), "registered DAO type");
    }

    /// Open a standalone session, e.g. to span a transaction across
    /// several DAOs. The caller owns its lifetime; prefer
    /// [`UnitOfWork::create_session`] so the cleanup sweep tracks it.
    pub async fn create_session(&self) -> Result<Session> {
        Session::open(self.inner.client.as_ref()).await
    }

    /// Start a unit of work. Sessions opened through the returned scope
    /// are tracked and swept by [`UnitOfWork::dispose`].
    pub fn begin_unit(&self) -> UnitOfWork {
        UnitOfWork::new(self.clone())
    }

    /// Run `f` inside a fresh unit of work. The cleanup sweep runs before
    /// this returns: on failure it closes every tracked session (rolling
    /// back any open transaction) before the error reaches the caller; on
    /// success it is a no-op for everything the caller already closed.
    pub async fn unit_of_work<R, Fut, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let unit = self.begin_unit();
        let result = f(unit.clone()).await;
        unit.dispose().await;
        result
    }

    /// Borrow an instance of `T`, open a fresh session, and bind them with
    /// exclusive ownership. A session-open failure returns the borrowed
    /// instance to its pool before propagating.
    pub(crate) async fn create_dao_exclusive<T: Dao>(
        &self,
        unit: &UnitOfWork,
    ) -> Result<DaoHandle<T>> {
        let pool = self.inner.pools.ensure::<T>();
        let (mut dao, permit) = pool.borrow::<T>().await?;
        let session = match self.create_session().await {
            Ok(session) => session,
            Err(err) => {
                pool.release(dao);
                return Err(err);
            }
        };
        unit.track_session(&session);
        dao.base_mut().bind(session, true);
        debug!(
            dao_type = std::any::type_name::<T>(),
            "issued DAO with exclusive session"
        );
        Ok(DaoHandle::new(dao, self.clone(), permit))
    }

    /// Borrow an instance of `T` and bind it to an existing session with
    /// shared ownership: closing the DAO releases only the instance, the
    /// session stays with its creator.
    pub(crate) async fn create_dao_shared<T: Dao>(
        &self,
        session: &Session,
    ) -> Result<DaoHandle<T>> {
        let pool = self.inner.pools.ensure::<T>();
        let (mut dao, permit) = pool.borrow::<T>().await?;
        dao.base_mut().bind(session.clone(), false);
        debug!(
            dao_type = std::any::type_name::<T>(),
            "issued DAO on shared session"
        );
        Ok(DaoHandle::new(dao, self.clone(), permit))
    }

    /// Put a DAO instance back into its type's pool. Invoked only by
    /// [`DaoHandle`]; fails if the type has no pool, which means the
    /// instance did not come from this manager.
    pub(crate) fn return_to_pool<T: Dao>(&self, dao: T) -> Result<()> {
        let pool = self
            .inner
            .pools
            .get::<T>()
            .ok_or(DaoError::UnknownPool {
                dao_type: std::any::type_name::<T>(),
            })?;
        pool.release(dao);
        debug!(
            dao_type = std::any::type_name::<T>(),
            "returned DAO to pool"
        );
        Ok(())
    }
}

impl std::fmt::Debug for DaoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoManager").finish_non_exhaustive()
    }
}
