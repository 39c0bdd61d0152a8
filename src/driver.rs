//! Driver integration traits.
//!
//! Defines the interface the routing layer needs from a database driver.
//! The router never talks to a database itself; it asks a
//! [`ConnectionProvider`] for physical connections and a
//! [`StatementBuilder`] for statement handles, and routes between them.
//!
//! These traits are deliberately small so that test doubles are trivial and
//! any driver (or pool) can be adapted with a few lines of glue.
//!
//! # Example
//!
//! ```rust
//! use replica_router::driver::{Connection, ConnectionProvider, DriverError};
//!
//! struct FakeConnection;
//!
//! impl Connection for FakeConnection {
//!     fn close(&mut self) -> Result<(), DriverError> {
//!         Ok(())
//!     }
//! }
//!
//! struct FakeProvider;
//!
//! impl ConnectionProvider for FakeProvider {
//!     type Connection = FakeConnection;
//!
//!     fn is_replica_available(&self) -> bool {
//!         false // main-only deployment
//!     }
//!
//!     fn main_connection(&self) -> Result<FakeConnection, DriverError> {
//!         Ok(FakeConnection)
//!     }
//!
//!     fn replica_connection(&self) -> Result<FakeConnection, DriverError> {
//!         Err(DriverError::unavailable("no replica configured"))
//!     }
//! }
//! ```

use std::sync::Arc;
use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// How far a transaction can see into concurrent work.
///
/// Levels above [`ReadCommitted`](IsolationLevel::ReadCommitted) force reads
/// to the main database: a replica cannot give repeatable-read or
/// serializable guarantees relative to writes it has not received yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadUncommitted => write!(f, "read_uncommitted"),
            Self::ReadCommitted => write!(f, "read_committed"),
            Self::RepeatableRead => write!(f, "repeatable_read"),
            Self::Serializable => write!(f, "serializable"),
        }
    }
}

/// Classification of a driver failure, as far as routing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The driver (or an adapter layer) does not implement the requested
    /// capability. Trips the circuit breaker: replica routing is disabled
    /// process-wide until an explicit reset.
    Unsupported,
    /// The target node could not be reached or refused the connection.
    Unavailable,
    /// Any other driver failure.
    Other,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Simplified error for driver operations.
///
/// Drivers adapt their native error type into this at the SPI edge. The
/// routing layer only inspects [`kind`](Self::kind); the message is carried
/// for the caller.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct DriverError {
    kind: DriverErrorKind,
    message: String,
}

impl DriverError {
    /// The driver signalled an unimplemented capability.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Unsupported,
            message: message.into(),
        }
    }

    /// The target node could not be reached.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Unavailable,
            message: message.into(),
        }
    }

    /// Any other driver failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check for the unsupported-capability signal.
    pub fn is_unsupported(&self) -> bool {
        self.kind == DriverErrorKind::Unsupported
    }
}

/// A physical database connection, as far as routing cares.
///
/// The router holds at most two of these per logical connection (main and
/// replica) and is responsible for releasing whichever it materialized.
pub trait Connection {
    /// Release the connection.
    ///
    /// Called once by the owner during close. Failures are logged and
    /// swallowed by the caller so one failing release never blocks another.
    fn close(&mut self) -> DriverResult<()>;

    /// Apply a transaction isolation level.
    ///
    /// Replayed onto whichever physical connection materializes for a
    /// logical connection that configured a level. The default ignores the
    /// request for drivers that configure isolation out of band.
    fn set_isolation(&mut self, isolation: IsolationLevel) -> DriverResult<()> {
        let _ = isolation;
        Ok(())
    }
}

/// Hands out physical connections to the main and replica nodes.
///
/// The provider decides what "a connection" means (fresh, pooled, proxied);
/// the router only requires that main and replica connections are
/// independently acquirable and that replica availability can be answered
/// cheaply without opening one.
pub trait ConnectionProvider: Send + Sync {
    type Connection: Connection;

    /// Whether a replica is currently worth trying at all.
    ///
    /// Must not open a connection. `false` routes all reads to main.
    fn is_replica_available(&self) -> bool;

    /// Open a connection to the main (writable) node.
    ///
    /// A failure here is always fatal to the requesting operation.
    fn main_connection(&self) -> DriverResult<Self::Connection>;

    /// Open a connection to a replica node.
    ///
    /// A failure here is governed by the configured
    /// [`ReplicaFailureStrategy`](crate::strategy::ReplicaFailureStrategy).
    fn replica_connection(&self) -> DriverResult<Self::Connection>;
}

impl<P: ConnectionProvider + ?Sized> ConnectionProvider for Arc<P> {
    type Connection = P::Connection;

    fn is_replica_available(&self) -> bool {
        (**self).is_replica_available()
    }

    fn main_connection(&self) -> DriverResult<Self::Connection> {
        (**self).main_connection()
    }

    fn replica_connection(&self) -> DriverResult<Self::Connection> {
        (**self).replica_connection()
    }
}

/// A statement handle produced by the driver.
///
/// The router is agnostic to what a statement can *do*; it only needs to
/// release handles it cached.
pub trait StatementHandle {
    /// Release the statement.
    ///
    /// Failures are swallowed by the dispatcher during close.
    fn close(&mut self) -> DriverResult<()>;
}

/// Creates statement handles on a given connection.
///
/// Implemented for plain closures, which is usually all a driver adapter
/// needs:
///
/// ```rust,ignore
/// let builder = |conn: &mut PgConnection| conn.statement();
/// ```
pub trait StatementBuilder<C, S> {
    fn build(&self, connection: &mut C) -> DriverResult<S>;
}

impl<C, S, F> StatementBuilder<C, S> for F
where
    F: Fn(&mut C) -> DriverResult<S>,
{
    fn build(&self, connection: &mut C) -> DriverResult<S> {
        self(connection)
    }
}

/// Lazily supplies a connection to a consistency check.
///
/// The laziness is a contract: an oracle that can answer from in-memory
/// state must not call [`connection`](Self::connection), and no physical
/// connection will be opened on its behalf.
pub trait ConnectionSupplier<C> {
    /// Materialize (once) and borrow the connection.
    fn connection(&mut self) -> DriverResult<&mut C>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_levels_are_ordered() {
        assert!(IsolationLevel::ReadUncommitted < IsolationLevel::ReadCommitted);
        assert!(IsolationLevel::ReadCommitted < IsolationLevel::RepeatableRead);
        assert!(IsolationLevel::RepeatableRead < IsolationLevel::Serializable);
    }

    #[test]
    fn driver_error_kinds() {
        assert!(DriverError::unsupported("x").is_unsupported());
        assert!(!DriverError::unavailable("x").is_unsupported());
        assert!(!DriverError::other("x").is_unsupported());
    }

    #[test]
    fn driver_error_formatting() {
        let err = DriverError::unavailable("replica-2 refused connection");
        let msg = err.to_string();
        assert!(msg.contains("unavailable"));
        assert!(msg.contains("replica-2"));
    }

    #[test]
    fn statement_builder_impl_for_closures() {
        struct Conn;
        let builder = |_: &mut Conn| Ok(42u32);
        let mut conn = Conn;
        assert_eq!(StatementBuilder::build(&builder, &mut conn).unwrap(), 42);
    }
}
