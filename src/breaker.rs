//! Circuit breaker guarding replica routing.
//!
//! Routing through a replica exercises driver capabilities the main-only
//! path never touches. When the driver reports one of those capabilities as
//! unsupported, retrying it on every statement is pointless; the breaker
//! latches open and all further routing goes to main.
//!
//! # States
//!
//! - **Closed**: normal operation, replica routing allowed
//! - **Open**: replica routing disabled process-wide
//! - **HalfClosed**: reserved for custom implementations that probe recovery
//!
//! The built-in [`BreakOnUnsupportedOperations`] never goes half-closed: an
//! unimplemented capability does not heal on its own, so the only way back
//! is an explicit [`reset`](BreakOnUnsupportedOperations::reset) by test or
//! operations code.
//!
//! # Scope
//!
//! The triggering cause is a property of the process (the capability is
//! missing everywhere), so one breaker instance is shared by reference
//! across all logical connections. Use
//! [`BreakOnUnsupportedOperations::process_shared`] for the common case or
//! construct and inject your own instance.

use crate::driver::DriverError;
use crate::metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Circuit breaker state, for routing gates and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, replica routing allowed.
    Closed,
    /// Probing recovery; treated as not-closed by the router.
    HalfClosed,
    /// Replica routing disabled.
    Open,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfClosed => write!(f, "half_closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Breaker SPI.
///
/// The router consults [`state`](Self::state) before considering a replica
/// and reports every driver failure it sees to [`handle`](Self::handle).
/// Implementations decide which failures matter. Observing a failure affects
/// *future* routing only; the failing call's outcome is unchanged.
pub trait CircuitBreaker: Send + Sync {
    fn state(&self) -> BreakerState;

    /// Observe a driver failure.
    fn handle(&self, error: &DriverError);
}

/// Latches open on the first unsupported-capability failure.
///
/// The CLOSED→OPEN transition is a compare-and-exchange: under concurrent
/// trips exactly one caller wins and emits the transition log line and
/// metric, so "the breaker opened" is observable exactly once.
#[derive(Debug, Default)]
pub struct BreakOnUnsupportedOperations {
    tripped: AtomicBool,
}

impl BreakOnUnsupportedOperations {
    pub fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
        }
    }

    /// The process-wide shared instance.
    ///
    /// All routers built without an explicit breaker share this one, which
    /// gives the unsupported-capability latch its process-wide scope.
    pub fn process_shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<BreakOnUnsupportedOperations>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Administrative reset back to closed.
    ///
    /// Deliberately not part of the [`CircuitBreaker`] SPI; nothing in the
    /// routing path may close an open breaker.
    pub fn reset(&self) {
        if self
            .tripped
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            metrics::record_breaker_reset();
        }
    }
}

impl CircuitBreaker for BreakOnUnsupportedOperations {
    fn state(&self) -> BreakerState {
        if self.tripped.load(Ordering::Acquire) {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    fn handle(&self, error: &DriverError) {
        if !error.is_unsupported() {
            return;
        }
        if self
            .tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!(error = %error, "unsupported driver operation, disabling replica routing");
            metrics::record_breaker_trip();
        }
    }
}

/// A breaker that never opens.
///
/// Stand-in for embedders that want replica routing unconditionally, and
/// for tests that must not share the process-wide latch.
#[derive(Debug, Default)]
pub struct ClosedBreaker;

impl CircuitBreaker for ClosedBreaker {
    fn state(&self) -> BreakerState {
        BreakerState::Closed
    }

    fn handle(&self, _error: &DriverError) {}
}
