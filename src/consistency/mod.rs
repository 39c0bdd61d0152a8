// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica consistency protocol.
//!
//! A replica mirrors main asynchronously and may lag. Before the router
//! serves the first read of a logical connection from a replica, it asks a
//! [`ReplicaConsistency`] implementation whether the replica reflects every
//! write this process has made. The answer decides between the replica and
//! a `REPLICA_INCONSISTENT` re-route to main.
//!
//! Implementations in this module:
//!
//! | Implementation | Decides by | Opens replica connections |
//! |----------------|-----------|---------------------------|
//! | [`SequenceConsistency`] | Comparing freshness tokens (LSN-style) | When a write was recorded |
//! | [`PessimisticPropagationConsistency`] | Assumed propagation window | Never |
//! | [`MultiReplicaConsistency`] | Every discovered replica's own check | One per discovered replica |
//! | [`WaitingConsistency`] | Retrying a delegate until it agrees | As the delegate does |
//!
//! # Laziness contract
//!
//! `is_consistent` receives a [`ConnectionSupplier`], not a connection. An
//! implementation that can answer from in-memory state must not invoke the
//! supplier; the router only opens a replica connection when an oracle
//! actually needs one.
//!
//! # Failure semantics
//!
//! An error returned by an oracle is propagated to the caller (see
//! DESIGN.md): it is never silently mapped to "consistent" or
//! "inconsistent".

mod cache;
mod multi;
mod pessimistic;
mod sequence;
mod waiting;

pub use cache::{Cache, MonotonicCache, SuppliedCache, ThrottledCache};
pub use multi::MultiReplicaConsistency;
pub use pessimistic::{Clock, PessimisticPropagationConsistency, SystemClock};
pub use sequence::{ConsistencyToken, SequenceConsistency, TokenSource};
pub use waiting::WaitingConsistency;

use crate::driver::ConnectionSupplier;
use crate::error::Result;

/// Judges whether a replica is ready to serve reads.
pub trait ReplicaConsistency<C>: Send + Sync {
    /// Record that a write executed on main.
    ///
    /// Called after each mutating statement so the oracle can sample
    /// whatever freshness marker it compares replicas against.
    fn write(&self, main: &mut C) -> Result<()>;

    /// Sample state just before a transaction commits on main.
    ///
    /// Most oracles have nothing to do here; implementations that track
    /// commit visibility rather than statement execution override it.
    fn pre_commit(&self, _main: &mut C) -> Result<()> {
        Ok(())
    }

    /// Judge if the replica has caught up with every recorded write.
    ///
    /// Must not invoke `replica` unless a physical connection is actually
    /// needed for the decision.
    fn is_consistent(&self, replica: &mut dyn ConnectionSupplier<C>) -> Result<bool>;
}
