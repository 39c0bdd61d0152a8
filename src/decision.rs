//! Routing decisions and their causal audit trail.
//!
//! Every statement dispatch produces a [`RouteDecision`]: which node was
//! chosen and why. When one decision forces another (a read re-routed to
//! main because the replica was stale), the new decision records the old one
//! as its [`cause`](RouteDecision::cause), forming an immutable causal
//! chain. Decisions are the only place the split between main and replica
//! becomes visible; the success path looks identical either way.

use std::fmt;
use std::sync::Arc;

/// Why a routing choice picked main or replica.
///
/// The vocabulary is fixed; `runs_on_main` and `is_write` are properties of
/// the reason itself, not of the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The caller asked for the write path explicitly.
    RwApiCall,
    /// The replica had not caught up with main, or was not usable.
    ReplicaInconsistent,
    /// Plain read, eligible for the replica.
    ReadOperation,
    /// The statement text is a write (DML/DDL).
    WriteOperation,
    /// A locking read (`SELECT ... FOR UPDATE` and friends).
    Lock,
    /// The logical connection already holds a main connection; reads reuse
    /// it rather than opening a replica connection that would go to waste.
    MainConnectionReuse,
    /// The tracked transaction isolation level is too strict for a replica.
    HighTransactionIsolationLevel,
    /// The caller asked for the read path explicitly.
    RoApiCall,
    /// The replica connection could not be acquired.
    ReplicaGetFailure,
}

impl Reason {
    /// Whether this reason routes to the main database.
    pub fn runs_on_main(&self) -> bool {
        !matches!(self, Self::ReadOperation | Self::RoApiCall)
    }

    /// Whether this reason marks an actual write.
    ///
    /// True only for `WRITE_OPERATION`, `LOCK` and `RW_API_CALL`; routing to
    /// main for reuse or consistency reasons is not a write.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::WriteOperation | Self::Lock | Self::RwApiCall)
    }

    /// Canonical name, stable across releases.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RwApiCall => "RW_API_CALL",
            Self::ReplicaInconsistent => "REPLICA_INCONSISTENT",
            Self::ReadOperation => "READ_OPERATION",
            Self::WriteOperation => "WRITE_OPERATION",
            Self::Lock => "LOCK",
            Self::MainConnectionReuse => "MAIN_CONNECTION_REUSE",
            Self::HighTransactionIsolationLevel => "HIGH_TRANSACTION_ISOLATION_LEVEL",
            Self::RoApiCall => "RO_API_CALL",
            Self::ReplicaGetFailure => "REPLICA_GET_FAILURE",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable audit record of one routing choice.
///
/// `cause` links to the decision that forced this one, if any. The chain is
/// acyclic by construction: decisions are created fresh and never mutated.
/// Equality is structural over reason, SQL and the whole cause chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    reason: Reason,
    sql: Option<String>,
    cause: Option<Arc<RouteDecision>>,
}

impl RouteDecision {
    /// The reason for the current route. The connection state may enforce it.
    pub fn reason(&self) -> Reason {
        self.reason
    }

    /// Whether this decision routed to the main database.
    pub fn runs_on_main(&self) -> bool {
        self.reason.runs_on_main()
    }

    /// Whether this decision marks an actual write.
    pub fn is_write(&self) -> bool {
        self.reason.is_write()
    }

    /// The SQL corresponding to the current route, if any.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// The earlier decision that forced this one, if any.
    pub fn cause(&self) -> Option<&RouteDecision> {
        self.cause.as_deref()
    }

    /// Walk the chain to the decision at its root.
    pub fn root_cause(&self) -> &RouteDecision {
        let mut decision = self;
        while let Some(cause) = decision.cause() {
            decision = cause;
        }
        decision
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(sql) = &self.sql {
            write!(f, " [{sql}]")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " caused by {cause}")?;
        }
        Ok(())
    }
}

/// Mutable builder for a [`RouteDecision`].
///
/// One builder travels through a single routing pass; the reason may be
/// rewritten along the way (a read becomes `REPLICA_INCONSISTENT` when the
/// oracle says no) before the final decision is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecisionBuilder {
    reason: Reason,
    sql: Option<String>,
    cause: Option<Arc<RouteDecision>>,
}

impl RouteDecisionBuilder {
    pub fn new(reason: Reason) -> Self {
        Self {
            reason,
            sql: None,
            cause: None,
        }
    }

    /// Attach the statement text.
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Rewrite the reason mid-route.
    pub fn set_reason(&mut self, reason: Reason) {
        self.reason = reason;
    }

    /// Record the decision that forced the current one.
    pub fn set_cause(&mut self, cause: RouteDecision) {
        self.cause = Some(Arc::new(cause));
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn sql_text(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Snapshot the builder into an immutable decision.
    pub fn build(&self) -> RouteDecision {
        RouteDecision {
            reason: self.reason,
            sql: self.sql.clone(),
            cause: self.cause.clone(),
        }
    }
}
