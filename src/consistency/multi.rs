//! Aggregated consistency across a discovered replica cluster.
//!
//! With more than one replica behind a shared reader endpoint, "the replica
//! is consistent" only means something if *every* replica is. This
//! aggregator walks the discovered set and runs the delegate check against
//! each node through that node's own connection factory.
//!
//! Connection ownership is strict: every connection this aggregator opens,
//! it closes, whether the verdict was consistent or not. The connection
//! behind the caller-supplied [`ConnectionSupplier`] belongs to the caller
//! and is never opened or closed here.

use super::ReplicaConsistency;
use crate::cluster::{CachedReplicaSet, ReplicaNode};
use crate::driver::{Connection, ConnectionSupplier, DriverResult};
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Consistent iff every discovered replica is.
///
/// The replica set comes through a [`CachedReplicaSet`] so discovery runs
/// on the cache's invalidation schedule, not on every check. The cache is
/// shared, not owned: several routers (and their oracles) can sit on the
/// same discovery view.
pub struct MultiReplicaConsistency<C> {
    delegate: Arc<dyn ReplicaConsistency<C>>,
    replicas: Arc<CachedReplicaSet<C>>,
}

impl<C: Connection> MultiReplicaConsistency<C> {
    pub fn new(
        delegate: Arc<dyn ReplicaConsistency<C>>,
        replicas: Arc<CachedReplicaSet<C>>,
    ) -> Self {
        Self { delegate, replicas }
    }

    fn check_replica(&self, replica: &ReplicaNode<C>) -> Result<bool> {
        let mut supplier = NodeSupplier {
            node: replica,
            connection: None,
            factory_failed: false,
        };
        let verdict = self.delegate.is_consistent(&mut supplier);

        // Close whatever we opened ourselves, on every path.
        if let Some(mut connection) = supplier.connection.take() {
            if let Err(error) = connection.close() {
                warn!(replica = %replica.id(), error = %error, "failed to close replica connection after consistency check");
            }
        }

        match verdict {
            Ok(consistent) => Ok(consistent),
            Err(error) if supplier.factory_failed => {
                // The node is likely mid-scale; do not fail the whole
                // cluster verdict over it.
                warn!(
                    replica = %replica.id(),
                    error = %error,
                    "replica connection could not be created during consistency check, treating as consistent"
                );
                Ok(true)
            }
            Err(error) => Err(error),
        }
    }
}

impl<C: Connection> ReplicaConsistency<C> for MultiReplicaConsistency<C> {
    fn write(&self, main: &mut C) -> Result<()> {
        self.delegate.write(main)
    }

    fn pre_commit(&self, main: &mut C) -> Result<()> {
        self.delegate.pre_commit(main)
    }

    fn is_consistent(&self, _replica: &mut dyn ConnectionSupplier<C>) -> Result<bool> {
        let replicas = self.replicas.get()?;
        debug!(count = replicas.len(), "checking consistency across replica set");

        for replica in &replicas {
            if !self.check_replica(replica)? {
                debug!(replica = %replica.id(), "replica behind main");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Lazily opens one node's connection through its factory.
struct NodeSupplier<'a, C> {
    node: &'a ReplicaNode<C>,
    connection: Option<C>,
    factory_failed: bool,
}

impl<C> ConnectionSupplier<C> for NodeSupplier<'_, C> {
    fn connection(&mut self) -> DriverResult<&mut C> {
        if self.connection.is_none() {
            match self.node.connect() {
                Ok(connection) => self.connection = Some(connection),
                Err(error) => {
                    self.factory_failed = true;
                    return Err(error);
                }
            }
        }
        self.connection
            .as_mut()
            .ok_or_else(|| crate::driver::DriverError::other("replica connection vanished mid-check"))
    }
}
