//! Policies for replica connection acquisition failures.
//!
//! Acquiring a replica connection is the one failure the router does not
//! simply propagate: deployments differ on whether a dead replica should be
//! invisible (serve the read from main) or loud (surface the failure so the
//! caller can shed load). The [`ReplicaFailureStrategy`] SPI makes that a
//! construction-time choice.
//!
//! Failure to acquire the *main* connection is never routed through a
//! strategy; without main there is nothing left to fall back to.

use crate::driver::DriverError;
use crate::error::{Result, RoutingError};

/// One-shot supplier for the main connection, wired by the state machine to
/// its own write path so a fallback keeps the audit trail intact.
pub type MainConnectionSupplier<'a, C> = Box<dyn FnOnce() -> Result<&'a mut C> + 'a>;

/// Decides what happens when a replica connection cannot be acquired.
pub trait ReplicaFailureStrategy<C>: Send + Sync {
    /// Handle a replica acquisition failure.
    ///
    /// Return a connection (usually by invoking `main`) to keep the caller
    /// oblivious, or an error to propagate the failure.
    fn on_failure<'a>(
        &self,
        error: DriverError,
        main: MainConnectionSupplier<'a, C>,
    ) -> Result<&'a mut C>;
}

/// Serve the operation from main and swallow the replica failure.
#[derive(Debug, Default)]
pub struct FallBackToMain;

impl<C> ReplicaFailureStrategy<C> for FallBackToMain {
    fn on_failure<'a>(
        &self,
        error: DriverError,
        main: MainConnectionSupplier<'a, C>,
    ) -> Result<&'a mut C> {
        tracing::debug!(error = %error, "replica acquisition failed, falling back to main");
        main()
    }
}

/// Re-raise the replica failure unchanged.
#[derive(Debug, Default)]
pub struct PropagateReplicaFailure;

impl<C> ReplicaFailureStrategy<C> for PropagateReplicaFailure {
    fn on_failure<'a>(
        &self,
        error: DriverError,
        _main: MainConnectionSupplier<'a, C>,
    ) -> Result<&'a mut C> {
        Err(RoutingError::Driver(error))
    }
}
