// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the routing layer.
//!
//! Errors are categorized by their source (driver, consistency oracle,
//! discovery) and by what the caller can do about them.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Driver` | Depends | Failure raised by the underlying driver, propagated unchanged |
//! | `ReplicaTimedOut` | Yes | A synchronous-wait consistency check exhausted its attempt bound |
//! | `Discovery` | Yes | Replica topology lookup failed |
//! | `ConnectionClosed` | Yes | Operation attempted on a closed logical connection |
//! | `Internal` | Yes | Routing-layer invariant violation (a bug) |
//!
//! # Fallback Behavior
//!
//! A `Driver` error raised while *acquiring a replica connection* is routed
//! through the configured [`ReplicaFailureStrategy`](crate::strategy::ReplicaFailureStrategy)
//! and may never reach the caller. A `Driver` error whose kind is
//! [`Unsupported`](crate::driver::DriverErrorKind::Unsupported) additionally
//! trips the process-wide circuit breaker before propagating. Everything
//! else is propagated as-is: the routing layer never converts an oracle or
//! discovery failure into a silent routing decision.

use crate::driver::{DriverError, DriverErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;

/// Errors that can occur while routing statements between main and replica.
#[derive(Error, Debug)]
pub enum RoutingError {
    /// Failure raised by the underlying driver.
    ///
    /// Propagated unchanged so the caller sees exactly what the driver
    /// reported, whether the call was served by main or by a replica.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// A waiting consistency check gave up.
    ///
    /// Raised by [`WaitingConsistency`](crate::consistency::WaitingConsistency)
    /// when the replica never caught up within the attempt bound. Fatal by
    /// design; the wrapper must not silently fall back.
    #[error("replica still inconsistent after {attempts} checks every {interval:?}")]
    ReplicaTimedOut { attempts: u32, interval: Duration },

    /// Replica topology lookup failed.
    ///
    /// Raised when a [`DatabaseCluster`](crate::cluster::DatabaseCluster)
    /// implementation cannot produce the current replica set. Fatal and
    /// propagated; see DESIGN.md for the fail-loud decision.
    #[error("replica discovery error: {0}")]
    Discovery(String),

    /// Operation attempted on a logical connection that is already closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Unexpected internal error.
    ///
    /// Indicates a routing-layer invariant was violated. Not recoverable.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RoutingError {
    /// Check if this error carries the driver's unsupported-capability signal.
    ///
    /// These are the failures that trip
    /// [`BreakOnUnsupportedOperations`](crate::breaker::BreakOnUnsupportedOperations).
    pub fn is_unsupported(&self) -> bool {
        match self {
            Self::Driver(e) => e.kind() == DriverErrorKind::Unsupported,
            _ => false,
        }
    }

    /// Check if this error came from the driver at all.
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}
