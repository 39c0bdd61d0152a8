// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-connection routing state machine.
//!
//! One [`ConnectionStateMachine`] backs each logical connection. It owns the
//! two lazily materialized physical connections (main and replica) and
//! decides, per request, which one serves it.
//!
//! # State Lifecycle
//!
//! ```text
//! NOT_INITIALISED ──► REPLICA ──► MAIN ──► CLOSED
//!        │                        ▲  │        ▲
//!        └────────────────────────┘  └────────┘
//! ```
//!
//! Transitions are monotonic: once a logical connection has touched main it
//! never goes back to a replica, and CLOSED is terminal. The one-way rule is
//! what makes read-your-own-write safe on this connection: a later read can
//! never silently land on a node staler than one already observed.
//!
//! A [`StateListener`] is notified synchronously on the triggering thread,
//! exactly once per actual state change.
//!
//! # Read Routing
//!
//! The first read consults, in order: the tracked isolation level, the
//! circuit breaker, replica availability, and the consistency oracle. Any
//! of them can veto the replica, re-routing the read to main with the veto
//! recorded as the decision's cause. Once REPLICA is established, later
//! reads reuse the handle without re-checking; once MAIN is established,
//! reads reuse the main connection (`MAIN_CONNECTION_REUSE`) rather than
//! opening a replica connection that could never be used again.

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::consistency::ReplicaConsistency;
use crate::decision::{Reason, RouteDecision, RouteDecisionBuilder};
use crate::driver::{
    Connection, ConnectionProvider, ConnectionSupplier, DriverError, DriverResult, IsolationLevel,
};
use crate::error::{Result, RoutingError};
use crate::lazy::LazyHandle;
use crate::metrics;
use crate::strategy::ReplicaFailureStrategy;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routing state of one logical connection.
///
/// `Ord` follows the monotonic lifecycle, so "state never decreases" is a
/// directly testable property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    NotInitialised,
    Replica,
    Main,
    Closed,
}

impl ConnectionState {
    /// Canonical name, stable across releases.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotInitialised => "NOT_INITIALISED",
            Self::Replica => "REPLICA",
            Self::Main => "MAIN",
            Self::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Observes state transitions of one logical connection.
///
/// Invoked synchronously on the thread that triggered the transition.
pub trait StateListener {
    fn transition(&self, from: ConnectionState, to: ConnectionState);
}

/// Listener that ignores every transition.
#[derive(Debug, Default)]
pub struct NoOpStateListener;

impl StateListener for NoOpStateListener {
    fn transition(&self, _from: ConnectionState, _to: ConnectionState) {}
}

/// Connection-level settings tracked for the logical connection.
///
/// Settings arrive before any physical connection exists; they are applied
/// to whichever connection materializes. The isolation level additionally
/// participates in routing: above read-committed, a replica cannot honor
/// the transaction's visibility guarantees.
#[derive(Debug, Default)]
pub struct ConnectionParameters {
    isolation: Option<IsolationLevel>,
}

impl ConnectionParameters {
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    pub fn set_isolation(&mut self, isolation: IsolationLevel) {
        self.isolation = Some(isolation);
    }

    fn forces_main(&self) -> bool {
        self.isolation
            .is_some_and(|level| level > IsolationLevel::ReadCommitted)
    }

    fn apply<C: Connection>(&self, connection: &mut C) -> DriverResult<()> {
        if let Some(level) = self.isolation {
            connection.set_isolation(level)?;
        }
        Ok(())
    }
}

/// Which slot ended up serving a routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Read,
    Write,
}

/// Owns the physical connections of one logical connection and routes
/// between them.
pub struct ConnectionStateMachine<P: ConnectionProvider> {
    provider: P,
    consistency: Arc<dyn ReplicaConsistency<P::Connection>>,
    breaker: Arc<dyn CircuitBreaker>,
    strategy: Arc<dyn ReplicaFailureStrategy<P::Connection>>,
    listener: Box<dyn StateListener>,
    parameters: ConnectionParameters,
    read: LazyHandle<P::Connection>,
    write: LazyHandle<P::Connection>,
    closed: bool,
}

impl<P: ConnectionProvider> ConnectionStateMachine<P> {
    pub fn new(
        provider: P,
        consistency: Arc<dyn ReplicaConsistency<P::Connection>>,
        breaker: Arc<dyn CircuitBreaker>,
        strategy: Arc<dyn ReplicaFailureStrategy<P::Connection>>,
        listener: Box<dyn StateListener>,
    ) -> Self {
        Self {
            provider,
            consistency,
            breaker,
            strategy,
            listener,
            parameters: ConnectionParameters::default(),
            read: LazyHandle::new(),
            write: LazyHandle::new(),
            closed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if self.write.is_materialized() {
            ConnectionState::Main
        } else if self.read.is_materialized() {
            ConnectionState::Replica
        } else {
            ConnectionState::NotInitialised
        }
    }

    /// The decision that put this connection in MAIN, if it is there.
    pub fn decision(&self) -> Option<RouteDecision> {
        if self.state() == ConnectionState::Main {
            self.write.first_cause().map(|builder| builder.build())
        } else {
            None
        }
    }

    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.parameters.isolation()
    }

    /// Track an isolation level, applying it to the live connection if one
    /// has materialized.
    pub fn set_isolation(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.parameters.set_isolation(isolation);
        if let Some(connection) = self.current_connection_mut() {
            connection.set_isolation(isolation)?;
        }
        Ok(())
    }

    /// A connection for a reading operation. Uses the replica if possible.
    pub fn get_read_connection(
        &mut self,
        builder: &mut RouteDecisionBuilder,
    ) -> Result<&mut P::Connection> {
        if self.closed {
            return Err(RoutingError::ConnectionClosed);
        }
        let before = self.state();
        let route = self.prepare_read(builder)?;
        self.notify_if_changed(before);
        self.routed_connection(route)
    }

    /// A connection for a writing operation. Always the main database.
    pub fn get_write_connection(
        &mut self,
        builder: &mut RouteDecisionBuilder,
    ) -> Result<&mut P::Connection> {
        if self.closed {
            return Err(RoutingError::ConnectionClosed);
        }
        let before = self.state();
        self.prepare_main(builder)?;
        self.notify_if_changed(before);
        self.routed_connection(Route::Write)
    }

    /// Release whichever physical connections materialized and force CLOSED.
    ///
    /// Release failures are logged and swallowed per connection so one
    /// failing release never blocks the other. The listener is notified
    /// once, with the true prior state. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let before = self.state();
        self.closed = true;

        if let Some(mut connection) = self.read.take() {
            if let Err(error) = connection.close() {
                warn!(connection = "replica", error = %error, "failed to release connection during close");
            }
        }
        if let Some(mut connection) = self.write.take() {
            if let Err(error) = connection.close() {
                warn!(connection = "main", error = %error, "failed to release connection during close");
            }
        }

        self.notify_if_changed(before);
    }

    fn prepare_read(&mut self, builder: &mut RouteDecisionBuilder) -> Result<Route> {
        if self.parameters.forces_main() {
            builder.set_reason(Reason::HighTransactionIsolationLevel);
            metrics::record_read_on_main(Reason::HighTransactionIsolationLevel);
            self.prepare_main(builder)?;
            return Ok(Route::Write);
        }

        match self.state() {
            ConnectionState::Closed => Err(RoutingError::ConnectionClosed),
            ConnectionState::Replica => Ok(Route::Read),
            ConnectionState::Main => {
                let cause = self.decision();
                builder.set_reason(Reason::MainConnectionReuse);
                if let Some(cause) = cause {
                    builder.set_cause(cause);
                }
                debug!("main connection reuse");
                metrics::record_read_on_main(Reason::MainConnectionReuse);
                Ok(Route::Write)
            }
            ConnectionState::NotInitialised => self.prepare_first_read(builder),
        }
    }

    /// First read of the connection's lifetime: every replica precondition
    /// is checked here, and only here.
    fn prepare_first_read(&mut self, builder: &mut RouteDecisionBuilder) -> Result<Route> {
        let breaker_open = self.breaker.state() != BreakerState::Closed;
        if breaker_open || !self.provider.is_replica_available() {
            debug!(breaker_open, "replica not usable, routing read to main");
            return self.reroute_to_main(builder, Reason::ReplicaInconsistent);
        }

        let consistency = Arc::clone(&self.consistency);
        let (verdict, acquisition_failed) = {
            let mut supplier = ReadSlotSupplier {
                handle: &mut self.read,
                provider: &self.provider,
                builder: &mut *builder,
                acquisition_failed: false,
            };
            let verdict = consistency.is_consistent(&mut supplier);
            (verdict, supplier.acquisition_failed)
        };

        match verdict {
            Ok(true) => {
                if !self.read.is_materialized() {
                    let provider = &self.provider;
                    if let Err(error) = self
                        .read
                        .get_or_try_init(builder, |_| provider.replica_connection())
                    {
                        return self.replica_acquisition_failed(builder, error);
                    }
                }
                if let Some(connection) = self.read.value_mut() {
                    self.parameters.apply(connection)?;
                }
                Ok(Route::Read)
            }
            Ok(false) => {
                debug!("replica behind main, routing read to main");
                self.reroute_to_main(builder, Reason::ReplicaInconsistent)
            }
            Err(error) if acquisition_failed => match error {
                RoutingError::Driver(driver_error) => {
                    self.replica_acquisition_failed(builder, driver_error)
                }
                other => Err(other),
            },
            // The oracle itself failed: fatal, never a silent routing choice.
            Err(error) => Err(error),
        }
    }

    /// Re-route a read to main, chaining the original decision as cause.
    fn reroute_to_main(
        &mut self,
        builder: &mut RouteDecisionBuilder,
        reason: Reason,
    ) -> Result<Route> {
        let original = builder.build();
        builder.set_reason(reason);
        builder.set_cause(original);
        metrics::record_read_on_main(reason);
        self.prepare_main(builder)?;
        Ok(Route::Write)
    }

    /// Replica acquisition failed: tell the breaker, then let the strategy
    /// decide between falling back to main and propagating.
    fn replica_acquisition_failed(
        &mut self,
        builder: &mut RouteDecisionBuilder,
        error: DriverError,
    ) -> Result<Route> {
        warn!(error = %error, "failed to acquire replica connection");
        self.breaker.handle(&error);

        let original = builder.build();
        builder.set_reason(Reason::ReplicaGetFailure);
        builder.set_cause(original);
        metrics::record_read_on_main(Reason::ReplicaGetFailure);

        let strategy = Arc::clone(&self.strategy);
        let state = &mut *self;
        strategy.on_failure(
            error,
            Box::new(move || {
                state.prepare_main(builder)?;
                state
                    .write
                    .value_mut()
                    .ok_or_else(|| RoutingError::Internal("main connection not materialized".into()))
            }),
        )?;
        Ok(Route::Write)
    }

    /// Materialize the main connection (once), promoting the logical
    /// connection to MAIN and releasing any replica handle it held.
    fn prepare_main(&mut self, builder: &mut RouteDecisionBuilder) -> Result<()> {
        if self.write.is_materialized() {
            return Ok(());
        }

        let provider = &self.provider;
        let breaker = &self.breaker;
        self.write
            .get_or_try_init(builder, |_| {
                provider.main_connection().inspect_err(|error| {
                    // Main acquisition failures are fatal, but the breaker
                    // still gets to observe an unsupported signal.
                    breaker.handle(error);
                })
            })
            .map_err(RoutingError::from)?;

        if let Some(mut replica) = self.read.take() {
            if let Err(error) = replica.close() {
                warn!(error = %error, "failed to release replica connection on promotion to main");
            }
        }

        if let Some(connection) = self.write.value_mut() {
            self.parameters.apply(connection)?;
        }
        Ok(())
    }

    fn current_connection_mut(&mut self) -> Option<&mut P::Connection> {
        match self.state() {
            ConnectionState::Main => self.write.value_mut(),
            ConnectionState::Replica => self.read.value_mut(),
            _ => None,
        }
    }

    fn routed_connection(&mut self, route: Route) -> Result<&mut P::Connection> {
        let handle = match route {
            Route::Read => &mut self.read,
            Route::Write => &mut self.write,
        };
        handle
            .value_mut()
            .ok_or_else(|| RoutingError::Internal("routed connection not materialized".into()))
    }

    fn notify_if_changed(&mut self, before: ConnectionState) {
        let after = self.state();
        if before != after {
            debug!(from = %before, to = %after, "connection state transition");
            metrics::record_state_transition(before, after);
            self.listener.transition(before, after);
        }
    }
}

/// Lazily materializes the replica slot on the oracle's behalf.
struct ReadSlotSupplier<'a, P: ConnectionProvider> {
    handle: &'a mut LazyHandle<P::Connection>,
    provider: &'a P,
    builder: &'a mut RouteDecisionBuilder,
    acquisition_failed: bool,
}

impl<P: ConnectionProvider> ConnectionSupplier<P::Connection> for ReadSlotSupplier<'_, P> {
    fn connection(&mut self) -> DriverResult<&mut P::Connection> {
        let provider = self.provider;
        self.handle
            .get_or_try_init(self.builder, |_| provider.replica_connection())
            .inspect_err(|_| {
                self.acquisition_failed = true;
            })
    }
}
