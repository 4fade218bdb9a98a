//! Per-type DAO instance pools.
//!
//! One pool per concrete DAO type, keyed by `TypeId`. Pools recycle
//! instances to avoid re-construction cost; they are strictly separate
//! from any connection pooling the underlying client does. The type map
//! is shared mutable state across units of work and supports concurrent
//! lookup/insert; each pool's idle store is its own short critical
//! section.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::{ExhaustionPolicy, PoolConfig};
use crate::dao::Dao;
use crate::error::{DaoError, Result};

/// Idle-instance pool for one DAO type.
pub(crate) struct TypedPool {
    dao_type: &'static str,
    idle: Mutex<Vec<Box<dyn Any + Send>>>,
    bound: Option<Bound>,
    max_idle: Option<usize>,
}

struct Bound {
    limit: usize,
    permits: Arc<Semaphore>,
    policy: ExhaustionPolicy,
}

impl TypedPool {
    fn new(dao_type: &'static str, config: &PoolConfig) -> Self {
        Self {
            dao_type,
            idle: Mutex::new(Vec::new()),
            bound: config.max_active.map(|limit| Bound {
                limit,
                permits: Arc::new(Semaphore::new(limit)),
                policy: config.on_exhausted,
            }),
            max_idle: config.max_idle,
        }
    }

    /// Take an idle instance or construct a fresh one. Under a bound the
    /// borrow holds a permit until the instance is returned.
    pub(crate) async fn borrow<T: Dao>(&self) -> Result<(T, Option<OwnedSemaphorePermit>)> {
        let permit = match &self.bound {
            None => None,
            Some(bound) => match bound.policy {
                ExhaustionPolicy::Fail => Some(
                    Arc::clone(&bound.permits).try_acquire_owned().map_err(|_| {
                        DaoError::PoolExhausted {
                            dao_type: self.dao_type,
                            limit: bound.limit,
                        }
                    })?,
                ),
                ExhaustionPolicy::Block => Some(
                    Arc::clone(&bound.permits)
                        .acquire_owned()
                        .await
                        .map_err(|_| DaoError::PoolExhausted {
                            dao_type: self.dao_type,
                            limit: bound.limit,
                        })?,
                ),
            },
        };

        let recycled = self.idle.lock().unwrap().pop();
        let dao = match recycled {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(dao) => {
                    debug!(dao_type = self.dao_type, "reusing pooled DAO instance");
                    *dao
                }
                // per-type keying makes this unreachable; construct rather
                // than lose the borrow
                Err(_) => T::default(),
            },
            None => {
                debug!(dao_type = self.dao_type, "constructing new DAO instance");
                T::default()
            }
        };
        Ok((dao, permit))
    }

    /// Put an instance back. Always succeeds; surplus instances beyond
    /// `max_idle` are dropped.
    pub(crate) fn release<T: Dao>(&self, dao: T) {
        let mut idle = self.idle.lock().unwrap();
        if let Some(cap) = self.max_idle {
            if idle.len() >= cap {
                debug!(dao_type = self.dao_type, "idle cap reached, dropping instance");
                return;
            }
        }
        idle.push(Box::new(dao));
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// Concurrent map from DAO type to its pool. Pools are created lazily on
/// first borrow (or eagerly via registration) and live as long as the
/// manager.
pub(crate) struct PoolMap {
    pools: Mutex<HashMap<TypeId, Arc<TypedPool>>>,
    config: PoolConfig,
}

impl PoolMap {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Look up or create the pool for `T`. Idempotent.
    pub(crate) fn ensure<T: Dao>(&self) -> Arc<TypedPool> {
        let mut pools = self.pools.lock().unwrap();
        Arc::clone(pools.entry(TypeId::of::<T>()).or_insert_with(|| {
            Arc::new(TypedPool::new(std::any::type_name::<T>(), &self.config))
        }))
    }

    pub(crate) fn get<T: Dao>(&self) -> Option<Arc<TypedPool>> {
        self.pools.lock().unwrap().get(&TypeId::of::<T>()).cloned()
    }
}
