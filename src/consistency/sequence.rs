//! Token-based consistency: compare replica freshness markers with main.
//!
//! A [`TokenSource`] reads an opaque, totally ordered marker from a
//! connection, typically a write-ahead-log sequence number or a bumped
//! sequence value. After each write the marker observed on main is
//! remembered; a replica is consistent when its own marker has reached it.

use super::cache::{Cache, MonotonicCache};
use super::ReplicaConsistency;
use crate::driver::{ConnectionSupplier, DriverResult};
use crate::error::Result;
use crate::metrics;

/// An opaque, totally ordered freshness marker.
///
/// Recorded on main at write time and compared against the replica's
/// observed marker; the replica is consistent once its marker is at least
/// the last one recorded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsistencyToken(pub u64);

impl std::fmt::Display for ConsistencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reads the current [`ConsistencyToken`] off a connection.
///
/// On main this samples the write position; on a replica it samples the
/// replay position. The same source is used for both.
pub trait TokenSource<C>: Send + Sync {
    fn fetch(&self, connection: &mut C) -> DriverResult<ConsistencyToken>;
}

impl<C, F> TokenSource<C> for F
where
    F: Fn(&mut C) -> DriverResult<ConsistencyToken> + Send + Sync,
{
    fn fetch(&self, connection: &mut C) -> DriverResult<ConsistencyToken> {
        self(connection)
    }
}

/// Consistency by token comparison.
///
/// With no write recorded yet the answer is "consistent" from memory alone;
/// no replica connection is opened.
pub struct SequenceConsistency<C> {
    source: Box<dyn TokenSource<C>>,
    last_write: MonotonicCache<ConsistencyToken>,
}

impl<C> SequenceConsistency<C> {
    pub fn new(source: impl TokenSource<C> + 'static) -> Self {
        Self {
            source: Box::new(source),
            last_write: MonotonicCache::new(),
        }
    }

    /// The last token recorded on main, if any.
    pub fn last_written(&self) -> Option<ConsistencyToken> {
        self.last_write.get()
    }
}

impl<C> ReplicaConsistency<C> for SequenceConsistency<C> {
    fn write(&self, main: &mut C) -> Result<()> {
        let token = self.source.fetch(main)?;
        self.last_write.put(token);
        Ok(())
    }

    fn is_consistent(&self, replica: &mut dyn ConnectionSupplier<C>) -> Result<bool> {
        let Some(last_write) = self.last_write.get() else {
            // Nothing written through this process yet; any replica is fine.
            return Ok(true);
        };
        let connection = replica.connection()?;
        let observed = self.source.fetch(connection)?;
        let consistent = observed >= last_write;
        metrics::record_consistency_check(consistent);
        tracing::debug!(
            observed = %observed,
            last_write = %last_write,
            consistent,
            "sequence consistency check"
        );
        Ok(consistent)
    }
}
