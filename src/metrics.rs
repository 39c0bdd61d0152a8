//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Routing decisions by reason
//! - Connection state transitions
//! - Circuit breaker trips and resets
//! - Consistency check outcomes
//! - Replica set discovery
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `router_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state.
//!
//! Recording is purely observational; nothing here feeds back into routing.

use crate::decision::Reason;
use crate::state::ConnectionState;
use metrics::{counter, gauge};

/// Record a routing decision.
pub fn record_route_decision(reason: Reason) {
    counter!("router_route_decisions_total", "reason" => reason.name()).increment(1);
}

/// Record a connection state transition.
pub fn record_state_transition(from: ConnectionState, to: ConnectionState) {
    counter!(
        "router_state_transitions_total",
        "from" => from.name(),
        "to" => to.name()
    )
    .increment(1);
}

/// Record the circuit breaker latching open.
pub fn record_breaker_trip() {
    counter!("router_breaker_trips_total").increment(1);
    gauge!("router_breaker_open").set(1.0);
}

/// Record an administrative breaker reset.
pub fn record_breaker_reset() {
    counter!("router_breaker_resets_total").increment(1);
    gauge!("router_breaker_open").set(0.0);
}

/// Record the outcome of a replica consistency check.
pub fn record_consistency_check(consistent: bool) {
    let outcome = if consistent { "consistent" } else { "inconsistent" };
    counter!("router_consistency_checks_total", "outcome" => outcome).increment(1);
}

/// Record a replica set discovery refresh.
pub fn record_replica_set_refresh(count: usize) {
    counter!("router_replica_set_refreshes_total").increment(1);
    gauge!("router_replica_set_size").set(count as f64);
}

/// Record a read served by main instead of a replica.
pub fn record_read_on_main(reason: Reason) {
    counter!("router_reads_on_main_total", "reason" => reason.name()).increment(1);
}
