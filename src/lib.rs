//! # Replica Router
//!
//! A transparent read/write-splitting layer for a single logical database
//! connection: callers issue statements against one handle, and the router
//! decides, per statement, whether it runs on the writable main node or a
//! read replica.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            replica-router                            │
//! │                                                                      │
//! │  ┌────────────┐   ┌───────────────┐   ┌───────────────────────────┐  │
//! │  │ DualRouter │──►│ Statement     │──►│ ConnectionStateMachine    │  │
//! │  │ (facade)   │   │ Dispatcher    │   │ NOT_INIT → REPLICA → MAIN │  │
//! │  └────────────┘   │ (classifier)  │   └───────────────────────────┘  │
//! │        │          └───────────────┘          │            │          │
//! │        ▼                                     ▼            ▼          │
//! │  ┌─────────────┐   ┌────────────────┐   ┌────────┐   ┌──────────┐   │
//! │  │RouteDecision│   │ ReplicaConsist-│   │Circuit │   │ Failure  │   │
//! │  │ audit chain │   │ ency (oracle)  │   │Breaker │   │ Strategy │   │
//! │  └─────────────┘   └────────────────┘   └────────┘   └──────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The actual database work is delegated to a driver behind the small SPIs
//! in [`driver`]; this crate is the decision and consistency engine that
//! makes replica usage transparent and safe:
//!
//! - **One-way state machine**: once a logical connection touches main it
//!   never silently falls back to a stale replica ([`state`]).
//! - **Statement classification**: writes and locking reads are recognized
//!   from the SQL text and forced to main ([`classifier`]).
//! - **Causal audit trail**: every routing choice is recorded, with the
//!   decision that forced it as its cause ([`decision`]).
//! - **Replica freshness**: a pluggable consistency oracle decides whether
//!   a replica reflects this process's writes ([`consistency`]).
//! - **Unsupported-operation breaker**: one unsupported driver capability
//!   disables replica routing process-wide until explicitly reset
//!   ([`breaker`]).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replica_router::{DualRouter, RouterConfig};
//! use replica_router::consistency::{SequenceConsistency};
//! use std::sync::Arc;
//!
//! let consistency = Arc::new(SequenceConsistency::new(lsn_source));
//! let mut router = DualRouter::builder(provider, statement_builder, consistency)
//!     .config(RouterConfig::default())
//!     .build();
//!
//! let stmt = router.read_statement("SELECT * FROM users")?;   // replica
//! let stmt = router.write_statement("UPDATE users SET ...")?; // main
//! router.record_write()?;
//! let stmt = router.read_statement("SELECT * FROM users")?;   // main, reused
//! router.close();
//! ```

pub mod breaker;
pub mod classifier;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod consistency;
pub mod decision;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod lazy;
pub mod metrics;
pub mod state;
pub mod strategy;

// Re-exports for convenience
pub use breaker::{BreakOnUnsupportedOperations, BreakerState, CircuitBreaker, ClosedBreaker};
pub use classifier::{SqlClassifier, StatementKind};
pub use config::RouterConfig;
pub use connection::{DualRouter, NoOpObserver, RouteObserver};
pub use consistency::ReplicaConsistency;
pub use decision::{Reason, RouteDecision, RouteDecisionBuilder};
pub use driver::{Connection, ConnectionProvider, DriverError, IsolationLevel, StatementHandle};
pub use error::{Result, RoutingError};
pub use state::{ConnectionState, ConnectionStateMachine, StateListener};
pub use strategy::{FallBackToMain, PropagateReplicaFailure, ReplicaFailureStrategy};
