//! Replica topology discovery.
//!
//! The router does not know how replicas are found; a [`DatabaseCluster`]
//! implementation (DNS, a management API, static config) produces the
//! current set of [`ReplicaNode`]s, each an identity plus a connection
//! factory that may fail independently.
//!
//! Discovery lookups can be slow, so consumers go through a
//! [`CachedReplicaSet`]: the discovered set is cached with its fetch
//! timestamp and re-fetched once it is older than the configured TTL. A
//! short TTL discovers cluster changes quickly; a long one keeps discovery
//! traffic off the hot path.

use crate::config::ReplicaSetCacheConfig;
use crate::driver::DriverResult;
use crate::error::{Result, RoutingError};
use crate::metrics;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// One discovered replica: a stable identity and a way to reach it.
pub struct ReplicaNode<C> {
    id: Uuid,
    factory: Box<dyn Fn() -> DriverResult<C> + Send + Sync>,
}

impl<C> ReplicaNode<C> {
    pub fn new(id: Uuid, factory: impl Fn() -> DriverResult<C> + Send + Sync + 'static) -> Self {
        Self {
            id,
            factory: Box::new(factory),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Open a connection to this replica.
    ///
    /// Callable repeatedly; each node may fail independently of the rest of
    /// the set.
    pub fn connect(&self) -> DriverResult<C> {
        (self.factory)()
    }
}

impl<C> std::fmt::Debug for ReplicaNode<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaNode").field("id", &self.id).finish()
    }
}

/// Produces the current replica set.
pub trait DatabaseCluster<C>: Send + Sync {
    /// Fetch the replicas currently part of the cluster.
    ///
    /// An empty vector is a valid answer (a cluster scaled to zero
    /// replicas). A lookup failure is fatal to the requesting consistency
    /// check; it is never treated as "no replicas".
    fn replicas(&self) -> Result<Vec<ReplicaNode<C>>>;
}

struct CacheEntry<C> {
    replicas: Vec<Arc<ReplicaNode<C>>>,
    fetched_at: Instant,
}

/// Staleness-invalidated view over a [`DatabaseCluster`].
pub struct CachedReplicaSet<C> {
    cluster: Box<dyn DatabaseCluster<C>>,
    config: ReplicaSetCacheConfig,
    entry: Mutex<Option<CacheEntry<C>>>,
}

impl<C> CachedReplicaSet<C> {
    pub fn new(cluster: impl DatabaseCluster<C> + 'static, config: ReplicaSetCacheConfig) -> Self {
        Self {
            cluster: Box::new(cluster),
            config,
            entry: Mutex::new(None),
        }
    }

    /// The current replica set, re-fetched if the cached one went stale.
    pub fn get(&self) -> Result<Vec<Arc<ReplicaNode<C>>>> {
        let mut entry = self
            .entry
            .lock()
            .map_err(|_| RoutingError::Internal("replica set cache poisoned".into()))?;

        if let Some(cached) = &*entry {
            if cached.fetched_at.elapsed() < self.config.ttl {
                return Ok(cached.replicas.clone());
            }
            tracing::debug!(
                age = ?cached.fetched_at.elapsed(),
                "cached replica set went stale, re-fetching"
            );
        }

        let replicas: Vec<Arc<ReplicaNode<C>>> =
            self.cluster.replicas()?.into_iter().map(Arc::new).collect();
        metrics::record_replica_set_refresh(replicas.len());
        *entry = Some(CacheEntry {
            replicas: replicas.clone(),
            fetched_at: Instant::now(),
        });
        Ok(replicas)
    }

    /// Drop the cached set so the next [`get`](Self::get) re-fetches.
    pub fn invalidate(&self) {
        if let Ok(mut entry) = self.entry.lock() {
            *entry = None;
        }
    }
}
