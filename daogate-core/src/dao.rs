//! DAO base contract.
//!
//! A DAO is a user-defined unit of related data-access operations. Concrete
//! types embed a [`DaoBase`] and implement [`Dao`]; domain operations are
//! built only from the primitives the base forwards to its bound session;
//! the underlying connection is never reachable from a DAO.
//!
//! ```no_run
//! use daogate_core::{Dao, DaoBase, Result, RowSet};
//!
//! #[derive(Default)]
//! struct UserDao {
//!     base: DaoBase,
//! }
//!
//! impl Dao for UserDao {
//!     fn base(&self) -> &DaoBase {
//!         &self.base
//!     }
//!     fn base_mut(&mut self) -> &mut DaoBase {
//!         &mut self.base
//!     }
//! }
//!
//! impl UserDao {
//!     async fn all_users(&self) -> Result<RowSet> {
//!         self.base().query("SELECT * FROM users", &[]).await
//!     }
//! }
//! ```

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;

use crate::error::{DaoError, Result};
use crate::manager::DaoManager;
use crate::session::Session;
use crate::value::{RowSet, SqlValue, UpdateOutcome};

/// State every DAO type embeds: the session binding and the ownership flag.
///
/// Between borrows an instance is idle (no binding); while issued it is
/// bound to exactly one session, either exclusively owned (the session
/// closes when the DAO does) or shared (the session's creator keeps it).
#[derive(Default)]
pub struct DaoBase {
    binding: Option<Binding>,
}

struct Binding {
    session: Session,
    owns_session: bool,
}

impl DaoBase {
    fn session(&self) -> Result<&Session> {
        self.binding
            .as_ref()
            .map(|b| &b.session)
            .ok_or(DaoError::Unbound)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Whether this DAO must close its session when it is closed.
    pub fn owns_session(&self) -> bool {
        self.binding.as_ref().is_some_and(|b| b.owns_session)
    }

    /// A clone of the bound session, if any. Handy for composing further
    /// DAOs onto the same session.
    pub fn session_handle(&self) -> Option<Session> {
        self.binding.as_ref().map(|b| b.session.clone())
    }

    pub(crate) fn bind(&mut self, session: Session, owns_session: bool) {
        debug_assert!(self.binding.is_none(), "binding an active DAO instance");
        self.binding = Some(Binding {
            session,
            owns_session,
        });
    }

    pub(crate) fn unbind(&mut self) -> Option<(Session, bool)> {
        self.binding.take().map(|b| (b.session, b.owns_session))
    }

    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RowSet> {
        self.session()?.execute_query(sql, params).await
    }

    pub async fn update(&self, sql: &str, params: &[SqlValue]) -> Result<UpdateOutcome> {
        self.session()?.execute_update(sql, params).await
    }

    pub async fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<UpdateOutcome> {
        self.session()?.execute_insert(sql, params).await
    }

    pub async fn batch(&self, sql: &str, param_sets: &[Vec<SqlValue>]) -> Result<Vec<u64>> {
        self.session()?.execute_batch(sql, param_sets).await
    }
}

impl std::fmt::Debug for DaoBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoBase")
            .field("bound", &self.is_bound())
            .field("owns_session", &self.owns_session())
            .finish()
    }
}

/// A poolable unit of data-access operations. `Default` is the pool's
/// constructor; concrete types carry no lifecycle state beyond their
/// embedded [`DaoBase`].
pub trait Dao: Default + Send + Sync + 'static {
    fn base(&self) -> &DaoBase;
    fn base_mut(&mut self) -> &mut DaoBase;
}

/// Transaction control available on every DAO: pure delegation to the
/// bound session. Calling any of these while unbound fails with
/// [`DaoError::Unbound`].
#[async_trait]
pub trait DaoTransactions {
    async fn start_transaction(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}

#[async_trait]
impl<T: Dao> DaoTransactions for T {
    async fn start_transaction(&self) -> Result<()> {
        self.base().session()?.begin_transaction().await
    }

    async fn commit(&self) -> Result<()> {
        self.base().session()?.commit().await
    }

    async fn rollback(&self) -> Result<()> {
        self.base().session()?.rollback().await
    }
}

/// Guard for a borrowed DAO instance.
///
/// Derefs to the concrete DAO. [`close`](DaoHandle::close) ends the borrow
/// explicitly: an exclusively-owned session is closed first, then the
/// instance is unbound and returned to its type's pool. Dropping the
/// handle without closing still unbinds and returns the instance; the
/// session itself is then reclaimed by whoever owns it (for exclusive
/// sessions, the unit of work's cleanup sweep).
pub struct DaoHandle<T: Dao> {
    dao: Option<T>,
    manager: DaoManager,
    // released after the instance is back in the pool
    _permit: Option<OwnedSemaphorePermit>,
}

impl<T: Dao> DaoHandle<T> {
    pub(crate) fn new(dao: T, manager: DaoManager, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            dao: Some(dao),
            manager,
            _permit: permit,
        }
    }

    /// End the borrow. Idempotent: a second `close` is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut dao) = self.dao.take() else {
            return Ok(());
        };
        let binding = dao.base_mut().unbind();
        let session_result = match binding {
            Some((session, true)) => session.close().await,
            _ => Ok(()),
        };
        let return_result = self.manager.return_to_pool(dao);
        self._permit = None;
        session_result?;
        return_result
    }

    /// Whether `close` has already run on this handle.
    pub fn is_closed(&self) -> bool {
        self.dao.is_none()
    }
}

impl<T: Dao> Deref for DaoHandle<T> {
    type Target = T;

    /// Panics if the handle was already closed; a closed handle must not
    /// be used.
    fn deref(&self) -> &T {
        self.dao.as_ref().expect("DAO handle used after close")
    }
}

impl<T: Dao> DerefMut for DaoHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.dao.as_mut().expect("DAO handle used after close")
    }
}

impl<T: Dao> Drop for DaoHandle<T> {
    fn drop(&mut self) {
        if let Some(mut dao) = self.dao.take() {
            dao.base_mut().unbind();
            if let Err(err) = self.manager.return_to_pool(dao) {
                warn!(error = %err, "failed to return DAO to its pool on drop");
            }
        }
    }
}

impl<T: Dao> std::fmt::Debug for DaoHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoHandle")
            .field("dao_type", &std::any::type_name::<T>())
            .field("closed", &self.is_closed())
            .finish()
    }
}
