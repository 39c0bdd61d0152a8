//! Shared test doubles for the routing integration tests.
//!
//! Records connection opens/closes and state transitions for assertions,
//! with configurable replica availability and failure injection. Canned
//! consistency implementations cover the always/never/eventually cases.

#![allow(dead_code)] // Each integration test binary uses a subset.

use replica_router::consistency::ReplicaConsistency;
use replica_router::decision::RouteDecision;
use replica_router::driver::{
    Connection, ConnectionProvider, ConnectionSupplier, DriverError, DriverResult, IsolationLevel,
    StatementHandle,
};
use replica_router::error::Result;
use replica_router::state::{ConnectionState, StateListener};
use replica_router::RouteObserver;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Which node a mock connection or statement points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Main,
    Replica,
}

/// A mock physical connection that counts its own release.
pub struct MockConnection {
    pub node: Node,
    pub isolation: Option<IsolationLevel>,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
}

impl Connection for MockConnection {
    fn close(&mut self) -> DriverResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(DriverError::other("close failed"));
        }
        Ok(())
    }

    fn set_isolation(&mut self, isolation: IsolationLevel) -> DriverResult<()> {
        self.isolation = Some(isolation);
        Ok(())
    }
}

/// A mock driver statement.
#[derive(Debug)]
pub struct MockStatement {
    pub node: Node,
    pub configured: Vec<&'static str>,
    closes: Arc<AtomicUsize>,
}

impl StatementHandle for MockStatement {
    fn close(&mut self) -> DriverResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock connection provider with failure injection.
///
/// # Example
/// ```rust,ignore
/// let provider = Arc::new(MockProvider::new());
/// provider.set_replica_available(false);
/// // build a router on Arc::clone(&provider), assert on provider counters
/// ```
pub struct MockProvider {
    replica_available: AtomicBool,
    fail_replica: AtomicBool,
    fail_main: AtomicBool,
    pub main_opens: AtomicUsize,
    pub replica_opens: AtomicUsize,
    pub main_closes: Arc<AtomicUsize>,
    pub replica_closes: Arc<AtomicUsize>,
}

impl MockProvider {
    /// A provider with a healthy, available replica.
    pub fn new() -> Self {
        Self {
            replica_available: AtomicBool::new(true),
            fail_replica: AtomicBool::new(false),
            fail_main: AtomicBool::new(false),
            main_opens: AtomicUsize::new(0),
            replica_opens: AtomicUsize::new(0),
            main_closes: Arc::new(AtomicUsize::new(0)),
            replica_closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_replica_available(&self, available: bool) {
        self.replica_available.store(available, Ordering::SeqCst);
    }

    /// Make replica connection acquisition fail.
    pub fn break_replica(&self) {
        self.fail_replica.store(true, Ordering::SeqCst);
    }

    /// Make main connection acquisition fail.
    pub fn break_main(&self) {
        self.fail_main.store(true, Ordering::SeqCst);
    }

    pub fn main_opens(&self) -> usize {
        self.main_opens.load(Ordering::SeqCst)
    }

    pub fn replica_opens(&self) -> usize {
        self.replica_opens.load(Ordering::SeqCst)
    }

    pub fn replica_closes(&self) -> usize {
        self.replica_closes.load(Ordering::SeqCst)
    }

    pub fn main_closes(&self) -> usize {
        self.main_closes.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for MockProvider {
    type Connection = MockConnection;

    fn is_replica_available(&self) -> bool {
        self.replica_available.load(Ordering::SeqCst)
    }

    fn main_connection(&self) -> DriverResult<MockConnection> {
        if self.fail_main.load(Ordering::SeqCst) {
            return Err(DriverError::unavailable("main down"));
        }
        self.main_opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            node: Node::Main,
            isolation: None,
            closes: Arc::clone(&self.main_closes),
            fail_close: false,
        })
    }

    fn replica_connection(&self) -> DriverResult<MockConnection> {
        if self.fail_replica.load(Ordering::SeqCst) {
            return Err(DriverError::unavailable("replica down"));
        }
        self.replica_opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            node: Node::Replica,
            isolation: None,
            closes: Arc::clone(&self.replica_closes),
            fail_close: false,
        })
    }
}

/// Statement builder counting creations and (per statement) releases.
pub fn counting_statement_builder(
    builds: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
) -> Box<dyn Fn(&mut MockConnection) -> DriverResult<MockStatement> + Send + Sync> {
    Box::new(move |connection: &mut MockConnection| {
        builds.fetch_add(1, Ordering::SeqCst);
        Ok(MockStatement {
            node: connection.node,
            configured: Vec::new(),
            closes: Arc::clone(&closes),
        })
    })
}

/// Listener recording every transition it sees.
#[derive(Default)]
pub struct RecordingListener {
    pub transitions: Arc<Mutex<Vec<(ConnectionState, ConnectionState)>>>,
}

impl RecordingListener {
    pub fn new() -> (Self, Arc<Mutex<Vec<(ConnectionState, ConnectionState)>>>) {
        let listener = Self::default();
        let transitions = Arc::clone(&listener.transitions);
        (listener, transitions)
    }
}

impl StateListener for RecordingListener {
    fn transition(&self, from: ConnectionState, to: ConnectionState) {
        self.transitions.lock().unwrap().push((from, to));
    }
}

/// Observer recording every routing decision.
#[derive(Default)]
pub struct RecordingObserver {
    pub decisions: Mutex<Vec<RouteDecision>>,
}

impl RouteObserver for RecordingObserver {
    fn on_decision(&self, _sql: Option<&str>, decision: &RouteDecision) {
        self.decisions.lock().unwrap().push(decision.clone());
    }
}

/// Always consistent.
pub struct PermanentConsistency;

impl<C> ReplicaConsistency<C> for PermanentConsistency {
    fn write(&self, _main: &mut C) -> Result<()> {
        Ok(())
    }

    fn is_consistent(&self, _replica: &mut dyn ConnectionSupplier<C>) -> Result<bool> {
        Ok(true)
    }
}

/// Never consistent.
pub struct PermanentInconsistency;

impl<C> ReplicaConsistency<C> for PermanentInconsistency {
    fn write(&self, _main: &mut C) -> Result<()> {
        Ok(())
    }

    fn is_consistent(&self, _replica: &mut dyn ConnectionSupplier<C>) -> Result<bool> {
        Ok(false)
    }
}

/// Cycles through a fixed sequence of answers, then repeats the last one.
pub struct CircularConsistency {
    answers: Vec<bool>,
    checks: AtomicUsize,
}

impl CircularConsistency {
    pub fn new(answers: Vec<bool>) -> Self {
        assert!(!answers.is_empty());
        Self {
            answers,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl<C> ReplicaConsistency<C> for CircularConsistency {
    fn write(&self, _main: &mut C) -> Result<()> {
        Ok(())
    }

    fn is_consistent(&self, _replica: &mut dyn ConnectionSupplier<C>) -> Result<bool> {
        let check = self.checks.fetch_add(1, Ordering::SeqCst);
        let index = check.min(self.answers.len() - 1);
        Ok(self.answers[index])
    }
}
