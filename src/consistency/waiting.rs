//! Block until the replica catches up.
//!
//! Retries a delegate's consistency check on a fixed interval until it
//! agrees or a hard attempt bound is hit, at which point the check fails
//! with [`RoutingError::ReplicaTimedOut`] rather than silently falling
//! back. The wait is a plain `thread::sleep` loop and is not cancellable
//! mid-wait.
//!
//! This is an integration/test aid: it turns "eventually consistent" into
//! "consistent or loudly broken" so test assertions don't race replication.
//! Do not put it on a production hot path.

use super::ReplicaConsistency;
use crate::config::WaitingConfig;
use crate::driver::ConnectionSupplier;
use crate::error::{Result, RoutingError};
use std::sync::Arc;
use tracing::debug;

/// Retries the delegate until the replica is consistent or the bound hits.
pub struct WaitingConsistency<C> {
    delegate: Arc<dyn ReplicaConsistency<C>>,
    config: WaitingConfig,
}

impl<C> WaitingConsistency<C> {
    pub fn new(delegate: Arc<dyn ReplicaConsistency<C>>, config: WaitingConfig) -> Self {
        Self { delegate, config }
    }
}

impl<C> ReplicaConsistency<C> for WaitingConsistency<C> {
    fn write(&self, main: &mut C) -> Result<()> {
        self.delegate.write(main)
    }

    fn pre_commit(&self, main: &mut C) -> Result<()> {
        self.delegate.pre_commit(main)
    }

    fn is_consistent(&self, replica: &mut dyn ConnectionSupplier<C>) -> Result<bool> {
        for attempt in 1..=self.config.max_attempts {
            if self.delegate.is_consistent(replica)? {
                return Ok(true);
            }
            debug!(
                attempt,
                max_attempts = self.config.max_attempts,
                "replica not caught up yet"
            );
            if attempt < self.config.max_attempts {
                std::thread::sleep(self.config.interval);
            }
        }
        Err(RoutingError::ReplicaTimedOut {
            attempts: self.config.max_attempts,
            interval: self.config.interval,
        })
    }
}
