// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Statement dispatch: one cached handle per path, classification in front.
//!
//! The dispatcher sits between the caller-facing logical connection and the
//! [`ConnectionStateMachine`]. It keeps at most two driver statement
//! handles alive (one on the read path, one on the write path) and runs
//! the [`SqlClassifier`] on each incoming statement text to pick the path.
//!
//! Statement configuration calls (fetch size, query timeout, anything that
//! must land on the driver handle) can arrive before any handle exists.
//! They are queued as [`StatementOperation`]s and replayed, in submission
//! order, on the handle each dispatch returns; the queue is then cleared.

use crate::classifier::{SqlClassifier, StatementKind};
use crate::decision::{Reason, RouteDecisionBuilder};
use crate::driver::{ConnectionProvider, DriverResult, StatementBuilder, StatementHandle};
use crate::error::{Result, RoutingError};
use crate::lazy::LazyHandle;
use crate::state::{ConnectionState, ConnectionStateMachine};
use tracing::debug;

/// A queued configuration call, applied to whichever statement handle
/// materializes.
pub type StatementOperation<S> = Box<dyn FnOnce(&mut S) -> DriverResult<()> + Send>;

/// FIFO buffer of configuration calls awaiting a statement handle.
struct OperationQueue<S> {
    queue: Vec<StatementOperation<S>>,
}

impl<S> OperationQueue<S> {
    fn new() -> Self {
        Self { queue: Vec::new() }
    }

    fn push(&mut self, operation: StatementOperation<S>) {
        self.queue.push(operation);
    }

    /// Apply queued operations in submission order, clearing the buffer.
    ///
    /// A failing operation propagates; operations after it are dropped with
    /// the rest of the buffer.
    fn replay(&mut self, statement: &mut S) -> DriverResult<()> {
        for operation in std::mem::take(&mut self.queue) {
            operation(statement)?;
        }
        Ok(())
    }
}

/// Which cached statement the caller saw last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurrentPath {
    None,
    Read,
    Write,
}

/// Per-logical-connection cache of lazily created statement handles.
pub struct StatementDispatcher<C, S> {
    statement_builder: Box<dyn StatementBuilder<C, S> + Send>,
    classifier: SqlClassifier,
    read: LazyHandle<S>,
    write: LazyHandle<S>,
    operations: OperationQueue<S>,
    current: CurrentPath,
}

impl<C, S: StatementHandle> StatementDispatcher<C, S> {
    pub fn new(
        statement_builder: Box<dyn StatementBuilder<C, S> + Send>,
        classifier: SqlClassifier,
    ) -> Self {
        Self {
            statement_builder,
            classifier,
            read: LazyHandle::new(),
            write: LazyHandle::new(),
            operations: OperationQueue::new(),
            current: CurrentPath::None,
        }
    }

    /// Queue a configuration call for the next dispatched statement.
    pub fn queue_operation(&mut self, operation: StatementOperation<S>) {
        self.operations.push(operation);
    }

    /// Dispatch a statement that the caller expects to read.
    ///
    /// The statement may still land on the write path: because the
    /// connection is already in MAIN, or because classification reveals the
    /// text to be a write or a locking read.
    pub fn read_statement<P>(
        &mut self,
        state: &mut ConnectionStateMachine<P>,
        builder: &mut RouteDecisionBuilder,
    ) -> Result<&mut S>
    where
        P: ConnectionProvider<Connection = C>,
    {
        if state.state() == ConnectionState::Main {
            builder.set_reason(Reason::MainConnectionReuse);
            if let Some(cause) = state.decision() {
                builder.set_cause(cause);
            }
            debug!("main connection reuse");
            return self.prepare_write_statement(state, builder);
        }

        if let Some(sql) = builder.sql_text() {
            match self.classifier.classify(sql) {
                StatementKind::Write => {
                    builder.set_reason(Reason::WriteOperation);
                    debug!("write operation");
                    return self.prepare_write_statement(state, builder);
                }
                StatementKind::Lock => {
                    builder.set_reason(Reason::Lock);
                    debug!("locking read");
                    return self.prepare_write_statement(state, builder);
                }
                StatementKind::Read => {}
            }
        }

        if self.current == CurrentPath::None {
            let statement_builder = &*self.statement_builder;
            self.read.get_or_try_init(builder, |b| {
                let connection = state.get_read_connection(b)?;
                statement_builder
                    .build(connection)
                    .map_err(RoutingError::from)
            })?;
            self.current = CurrentPath::Read;
        }
        self.replay_and_return()
    }

    /// Dispatch a statement on the write path unconditionally.
    pub fn write_statement<P>(
        &mut self,
        state: &mut ConnectionStateMachine<P>,
        builder: &mut RouteDecisionBuilder,
    ) -> Result<&mut S>
    where
        P: ConnectionProvider<Connection = C>,
    {
        self.prepare_write_statement(state, builder)
    }

    /// The statement most recently dispatched, if any.
    pub fn current_statement_mut(&mut self) -> Option<&mut S> {
        match self.current {
            CurrentPath::None => None,
            CurrentPath::Read => self.read.value_mut(),
            CurrentPath::Write => self.write.value_mut(),
        }
    }

    /// Close every materialized statement handle and forget them.
    ///
    /// Individual close failures are swallowed; there is no way to surface
    /// them usefully once the statements are going away.
    pub fn close(&mut self) {
        for handle in [&mut self.read, &mut self.write] {
            if let Some(mut statement) = handle.take() {
                if let Err(error) = statement.close() {
                    debug!(error = %error, "failed to close statement handle");
                }
            }
        }
        self.current = CurrentPath::None;
    }

    fn prepare_write_statement<P>(
        &mut self,
        state: &mut ConnectionStateMachine<P>,
        builder: &mut RouteDecisionBuilder,
    ) -> Result<&mut S>
    where
        P: ConnectionProvider<Connection = C>,
    {
        let statement_builder = &*self.statement_builder;
        self.write.get_or_try_init(builder, |b| {
            let connection = state.get_write_connection(b)?;
            statement_builder
                .build(connection)
                .map_err(RoutingError::from)
        })?;
        self.current = CurrentPath::Write;
        self.replay_and_return()
    }

    fn replay_and_return(&mut self) -> Result<&mut S> {
        let statement = match self.current {
            CurrentPath::Read => self.read.value_mut(),
            CurrentPath::Write => self.write.value_mut(),
            CurrentPath::None => None,
        }
        .ok_or_else(|| RoutingError::Internal("current statement not materialized".into()))?;
        self.operations.replay(statement)?;
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::ClosedBreaker;
    use crate::consistency::ReplicaConsistency;
    use crate::driver::{
        Connection, ConnectionSupplier, DriverError, DriverResult, IsolationLevel,
    };
    use crate::state::NoOpStateListener;
    use crate::strategy::FallBackToMain;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Node {
        Main,
        Replica,
    }

    struct TestConn {
        node: Node,
    }

    impl Connection for TestConn {
        fn close(&mut self) -> DriverResult<()> {
            Ok(())
        }
        fn set_isolation(&mut self, _isolation: IsolationLevel) -> DriverResult<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct TestStatement {
        node: Node,
        applied: Vec<&'static str>,
        closed: bool,
    }

    impl StatementHandle for TestStatement {
        fn close(&mut self) -> DriverResult<()> {
            self.closed = true;
            Ok(())
        }
    }

    struct TestProvider;

    impl ConnectionProvider for TestProvider {
        type Connection = TestConn;
        fn is_replica_available(&self) -> bool {
            true
        }
        fn main_connection(&self) -> DriverResult<TestConn> {
            Ok(TestConn { node: Node::Main })
        }
        fn replica_connection(&self) -> DriverResult<TestConn> {
            Ok(TestConn { node: Node::Replica })
        }
    }

    struct AlwaysConsistent;
    impl ReplicaConsistency<TestConn> for AlwaysConsistent {
        fn write(&self, _main: &mut TestConn) -> crate::error::Result<()> {
            Ok(())
        }
        fn is_consistent(
            &self,
            _replica: &mut dyn ConnectionSupplier<TestConn>,
        ) -> crate::error::Result<bool> {
            Ok(true)
        }
    }

    fn state_machine() -> ConnectionStateMachine<TestProvider> {
        ConnectionStateMachine::new(
            TestProvider,
            Arc::new(AlwaysConsistent),
            Arc::new(ClosedBreaker),
            Arc::new(FallBackToMain),
            Box::new(NoOpStateListener),
        )
    }

    fn dispatcher(builds: Arc<AtomicUsize>) -> StatementDispatcher<TestConn, TestStatement> {
        StatementDispatcher::new(
            Box::new(move |connection: &mut TestConn| {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(TestStatement {
                    node: connection.node,
                    applied: Vec::new(),
                    closed: false,
                })
            }),
            SqlClassifier::new(Vec::<String>::new(), false),
        )
    }

    fn read_builder(sql: &str) -> RouteDecisionBuilder {
        RouteDecisionBuilder::new(Reason::ReadOperation).sql(sql)
    }

    #[test]
    fn read_statement_lands_on_replica() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        let mut builder = read_builder("SELECT * FROM users");
        let statement = dispatcher.read_statement(&mut state, &mut builder).unwrap();
        assert_eq!(statement.node, Node::Replica);
        assert_eq!(builder.reason(), Reason::ReadOperation);
    }

    #[test]
    fn read_statement_is_cached_across_calls() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        for _ in 0..4 {
            let mut builder = read_builder("SELECT 1");
            dispatcher.read_statement(&mut state, &mut builder).unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_sql_through_read_api_goes_to_main() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        let mut builder = read_builder("INSERT INTO t VALUES (1)");
        let statement = dispatcher.read_statement(&mut state, &mut builder).unwrap();
        assert_eq!(statement.node, Node::Main);
        assert_eq!(builder.reason(), Reason::WriteOperation);
        assert_eq!(state.state(), ConnectionState::Main);
    }

    #[test]
    fn locking_read_goes_to_main_with_lock_reason() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        let mut builder = read_builder("SELECT * FROM jobs FOR UPDATE");
        let statement = dispatcher.read_statement(&mut state, &mut builder).unwrap();
        assert_eq!(statement.node, Node::Main);
        assert_eq!(builder.reason(), Reason::Lock);
    }

    #[test]
    fn read_after_write_reuses_main_statement() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        let mut write = RouteDecisionBuilder::new(Reason::RwApiCall).sql("UPDATE t SET x = 1");
        dispatcher.write_statement(&mut state, &mut write).unwrap();

        let mut read = read_builder("SELECT 1");
        let statement = dispatcher.read_statement(&mut state, &mut read).unwrap();
        assert_eq!(statement.node, Node::Main);
        assert_eq!(read.reason(), Reason::MainConnectionReuse);
        assert_eq!(read.build().cause().unwrap().reason(), Reason::RwApiCall);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queued_operations_replay_in_order_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        dispatcher.queue_operation(Box::new(|s: &mut TestStatement| {
            s.applied.push("fetch_size");
            Ok(())
        }));
        dispatcher.queue_operation(Box::new(|s: &mut TestStatement| {
            s.applied.push("timeout");
            Ok(())
        }));

        let mut builder = read_builder("SELECT 1");
        let statement = dispatcher.read_statement(&mut state, &mut builder).unwrap();
        assert_eq!(statement.applied, vec!["fetch_size", "timeout"]);

        // The buffer was cleared; a second dispatch replays nothing.
        let mut builder = read_builder("SELECT 1");
        let statement = dispatcher.read_statement(&mut state, &mut builder).unwrap();
        assert_eq!(statement.applied, vec!["fetch_size", "timeout"]);
    }

    #[test]
    fn operation_failure_propagates() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        dispatcher.queue_operation(Box::new(|_: &mut TestStatement| {
            Err(DriverError::unsupported("fetch size"))
        }));

        let mut builder = read_builder("SELECT 1");
        let error = dispatcher
            .read_statement(&mut state, &mut builder)
            .unwrap_err();
        assert!(error.is_unsupported());
    }

    #[test]
    fn current_statement_tracks_last_dispatch() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        assert!(dispatcher.current_statement_mut().is_none());

        let mut builder = read_builder("SELECT 1");
        dispatcher.read_statement(&mut state, &mut builder).unwrap();
        assert_eq!(
            dispatcher.current_statement_mut().unwrap().node,
            Node::Replica
        );

        let mut write = RouteDecisionBuilder::new(Reason::RwApiCall).sql("DELETE FROM t");
        dispatcher.write_statement(&mut state, &mut write).unwrap();
        assert_eq!(dispatcher.current_statement_mut().unwrap().node, Node::Main);
    }

    #[test]
    fn close_resets_statement_cache() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut state = state_machine();
        let mut dispatcher = dispatcher(Arc::clone(&builds));

        let mut builder = read_builder("SELECT 1");
        dispatcher.read_statement(&mut state, &mut builder).unwrap();
        dispatcher.close();

        assert!(dispatcher.current_statement_mut().is_none());

        // A new dispatch materializes a fresh statement.
        let mut builder = read_builder("SELECT 1");
        dispatcher.read_statement(&mut state, &mut builder).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
