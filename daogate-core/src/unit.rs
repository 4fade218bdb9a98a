//! Unit of work: the pending-cleanup scope for one logical request/task.
//!
//! The original generation of this layer parked its cleanup list in an
//! ambient request context; here the scope is an explicit value obtained
//! from [`DaoManager::begin_unit`] and threaded to wherever resources are
//! created. Sessions opened through the scope are tracked in registration
//! order; [`dispose`](UnitOfWork::dispose) sweeps them in reverse order
//! (DAOs are issued after the sessions they borrow, so newest-first
//! reclaims dependents before their sessions close). DAO instances
//! themselves return to their pools deterministically when their handles
//! drop, so the sweep's job is the resource whose leak actually hurts:
//! connections.

use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::dao::{Dao, DaoHandle};
use crate::error::Result;
use crate::manager::DaoManager;
use crate::session::Session;

struct UnitInner {
    manager: DaoManager,
    sessions: Mutex<Vec<Session>>,
}

/// Tracks every session opened during one unit of work and closes any the
/// caller did not. Clone-able; clones share one cleanup set.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<UnitInner>,
}

impl UnitOfWork {
    pub(crate) fn new(manager: DaoManager) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                manager,
                sessions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn manager(&self) -> &DaoManager {
        &self.inner.manager
    }

    /// Borrow a `T`, bound to a fresh session this DAO exclusively owns.
    pub async fn create_dao<T: Dao>(&self) -> Result<DaoHandle<T>> {
        self.inner.manager.create_dao_exclusive(self).await
    }

    /// Borrow a `T`, bound to `session` with shared ownership. This is
    /// how several DAOs compose into one transaction.
    pub async fn create_dao_with<T: Dao>(&self, session: &Session) -> Result<DaoHandle<T>> {
        self.inner.manager.create_dao_shared(session).await
    }

    /// Open a session tracked by this unit's cleanup set.
    pub async fn create_session(&self) -> Result<Session> {
        let session = self.inner.manager.create_session().await?;
        self.track_session(&session);
        Ok(session)
    }

    pub(crate) fn track_session(&self, session: &Session) {
        self.inner.sessions.lock().unwrap().push(session.clone());
    }

    /// Close every tracked session, newest first. Idempotent, and safe
    /// after normal caller-side cleanup: closing a closed session is a
    /// no-op. Sweep failures are logged, never raised: they must not
    /// mask the failure that triggered the sweep.
    pub async fn dispose(&self) {
        let sessions: Vec<Session> = {
            let mut tracked = self.inner.sessions.lock().unwrap();
            tracked.drain(..).collect()
        };
        if sessions.is_empty() {
            return;
        }
        debug!(count = sessions.len(), "cleanup sweep");
        for session in sessions.into_iter().rev() {
            if let Err(err) = session.close().await {
                error!(error = %err, "cleanup sweep failed to close session");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_sessions(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("tracked", &self.inner.sessions.lock().unwrap().len())
            .finish()
    }
}
