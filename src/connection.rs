//! The caller-facing logical connection.
//!
//! A [`DualRouter`] is the one handle the application holds. Underneath, it
//! wires a [`ConnectionStateMachine`] (which physical connection) to a
//! [`StatementDispatcher`] (which statement handle), consults the
//! consistency oracle on writes, and reports every decision to the
//! observation hook. Routing is invisible on the success path: the caller
//! gets a statement handle either way, and only the [`RouteDecision`] audit
//! trail reveals which node it points at.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut router = DualRouter::builder(provider, statement_builder, consistency)
//!     .config(RouterConfig::default())
//!     .build();
//!
//! let statement = router.read_statement("SELECT * FROM users")?;
//! // drive the driver statement...
//! let statement = router.write_statement("UPDATE users SET active = true")?;
//! router.record_write()?; // let the oracle sample the freshness token
//! router.close();
//! ```

use crate::breaker::{BreakOnUnsupportedOperations, CircuitBreaker};
use crate::classifier::SqlClassifier;
use crate::config::RouterConfig;
use crate::consistency::ReplicaConsistency;
use crate::decision::{Reason, RouteDecision, RouteDecisionBuilder};
use crate::dispatcher::{StatementDispatcher, StatementOperation};
use crate::driver::{
    ConnectionProvider, DriverError, IsolationLevel, StatementBuilder, StatementHandle,
};
use crate::error::{Result, RoutingError};
use crate::metrics;
use crate::state::{ConnectionState, ConnectionStateMachine, NoOpStateListener, StateListener};
use crate::strategy::{FallBackToMain, ReplicaFailureStrategy};
use std::sync::Arc;

/// Observes every routing decision, for audit and metrics.
///
/// Invoked after each dispatched statement with the statement text (if any)
/// and the decision that routed it. Purely observational: implementations
/// cannot alter routing, and should return quickly.
pub trait RouteObserver: Send + Sync {
    fn on_decision(&self, sql: Option<&str>, decision: &RouteDecision);
}

/// Observer that ignores every decision.
#[derive(Debug, Default)]
pub struct NoOpObserver;

impl RouteObserver for NoOpObserver {
    fn on_decision(&self, _sql: Option<&str>, _decision: &RouteDecision) {}
}

/// The read/write-splitting logical connection.
pub struct DualRouter<P: ConnectionProvider, S> {
    state: ConnectionStateMachine<P>,
    dispatcher: StatementDispatcher<P::Connection, S>,
    consistency: Arc<dyn ReplicaConsistency<P::Connection>>,
    observer: Arc<dyn RouteObserver>,
    breaker: Arc<dyn CircuitBreaker>,
    last_decision: Option<RouteDecision>,
}

impl<P, S> DualRouter<P, S>
where
    P: ConnectionProvider,
    S: StatementHandle,
{
    pub fn builder(
        provider: P,
        statement_builder: impl StatementBuilder<P::Connection, S> + Send + 'static,
        consistency: Arc<dyn ReplicaConsistency<P::Connection>>,
    ) -> DualRouterBuilder<P, S> {
        DualRouterBuilder {
            provider,
            statement_builder: Box::new(statement_builder),
            consistency,
            breaker: None,
            strategy: None,
            listener: None,
            observer: None,
            config: RouterConfig::default(),
        }
    }

    /// Dispatch a statement the caller expects to read.
    ///
    /// Classification may still route it to main; see
    /// [`StatementDispatcher`].
    pub fn read_statement(&mut self, sql: &str) -> Result<&mut S> {
        let mut builder = RouteDecisionBuilder::new(Reason::ReadOperation).sql(sql);
        self.dispatch(&mut builder, Dispatch::Read)
    }

    /// Dispatch a statement on the write path.
    pub fn write_statement(&mut self, sql: &str) -> Result<&mut S> {
        let mut builder = RouteDecisionBuilder::new(Reason::RwApiCall).sql(sql);
        self.dispatch(&mut builder, Dispatch::Write)
    }

    /// The statement most recently dispatched, if any.
    pub fn current_statement(&mut self) -> Option<&mut S> {
        self.dispatcher.current_statement_mut()
    }

    /// The decision behind the most recent dispatch.
    pub fn last_decision(&self) -> Option<&RouteDecision> {
        self.last_decision.as_ref()
    }

    /// The decision that put this connection in MAIN, if it is there.
    pub fn decision(&self) -> Option<RouteDecision> {
        self.state.decision()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Track a transaction isolation level for this logical connection.
    ///
    /// Above read-committed, all reads route to main.
    pub fn set_isolation(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.state.set_isolation(isolation)
    }

    /// Queue a configuration call for the next dispatched statement.
    pub fn queue_statement_operation(&mut self, operation: StatementOperation<S>) {
        self.dispatcher.queue_operation(operation);
    }

    /// Tell the consistency oracle a write has executed on main.
    ///
    /// Call after each mutating statement completes; the oracle samples its
    /// freshness marker from the main connection.
    pub fn record_write(&mut self) -> Result<()> {
        let consistency = Arc::clone(&self.consistency);
        let mut builder = RouteDecisionBuilder::new(Reason::RwApiCall);
        let connection = self.state.get_write_connection(&mut builder)?;
        consistency.write(connection)
    }

    /// Tell the consistency oracle the transaction is about to commit.
    ///
    /// A no-op unless the connection has touched main.
    pub fn pre_commit(&mut self) -> Result<()> {
        if self.state.state() != ConnectionState::Main {
            return Ok(());
        }
        let consistency = Arc::clone(&self.consistency);
        let mut builder = RouteDecisionBuilder::new(Reason::RwApiCall);
        let connection = self.state.get_write_connection(&mut builder)?;
        consistency.pre_commit(connection)
    }

    /// Report a driver failure observed outside the router.
    ///
    /// Statement execution happens against the driver directly, out of the
    /// router's sight; feeding failures back here lets the circuit breaker
    /// see unsupported-capability signals wherever they surface. The
    /// failure's outcome for the current call is unchanged.
    pub fn report_failure(&self, error: &DriverError) {
        self.breaker.handle(error);
    }

    /// Close statements, then connections.
    ///
    /// Statement handles are released before the connections under them.
    /// Individual release failures are swallowed. Idempotent.
    pub fn close(&mut self) {
        self.dispatcher.close();
        self.state.close();
    }

    fn dispatch(&mut self, builder: &mut RouteDecisionBuilder, kind: Dispatch) -> Result<&mut S> {
        match kind {
            Dispatch::Read => self.dispatcher.read_statement(&mut self.state, builder)?,
            Dispatch::Write => self.dispatcher.write_statement(&mut self.state, builder)?,
        };

        let decision = builder.build();
        metrics::record_route_decision(decision.reason());
        self.observer.on_decision(decision.sql(), &decision);
        self.last_decision = Some(decision);

        self.dispatcher
            .current_statement_mut()
            .ok_or_else(|| RoutingError::Internal("dispatched statement vanished".into()))
    }
}

#[derive(Debug, Clone, Copy)]
enum Dispatch {
    Read,
    Write,
}

/// Builder for [`DualRouter`].
///
/// Every collaborator beyond the three required ones has a production
/// default: the process-shared breaker, fall-back-to-main on replica
/// failure, and no-op listener/observer.
pub struct DualRouterBuilder<P: ConnectionProvider, S> {
    provider: P,
    statement_builder: Box<dyn StatementBuilder<P::Connection, S> + Send>,
    consistency: Arc<dyn ReplicaConsistency<P::Connection>>,
    breaker: Option<Arc<dyn CircuitBreaker>>,
    strategy: Option<Arc<dyn ReplicaFailureStrategy<P::Connection>>>,
    listener: Option<Box<dyn StateListener>>,
    observer: Option<Arc<dyn RouteObserver>>,
    config: RouterConfig,
}

impl<P, S> DualRouterBuilder<P, S>
where
    P: ConnectionProvider,
    S: StatementHandle,
{
    pub fn breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn ReplicaFailureStrategy<P::Connection>>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn listener(mut self, listener: Box<dyn StateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RouteObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> DualRouter<P, S> {
        let breaker = self
            .breaker
            .unwrap_or_else(|| BreakOnUnsupportedOperations::process_shared());
        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(FallBackToMain));
        let listener = self.listener.unwrap_or_else(|| Box::new(NoOpStateListener));
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(NoOpObserver));

        let classifier = SqlClassifier::new(
            self.config.read_only_functions.iter(),
            self.config.compatibility_mode,
        );

        DualRouter {
            state: ConnectionStateMachine::new(
                self.provider,
                Arc::clone(&self.consistency),
                Arc::clone(&breaker),
                strategy,
                listener,
            ),
            dispatcher: StatementDispatcher::new(self.statement_builder, classifier),
            consistency: self.consistency,
            observer,
            breaker,
            last_decision: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::ClosedBreaker;
    use crate::consistency::ReplicaConsistency;
    use crate::driver::{Connection, ConnectionSupplier, DriverResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

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
    }

    struct TestStatement {
        node: Node,
    }

    impl StatementHandle for TestStatement {
        fn close(&mut self) -> DriverResult<()> {
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

    struct CountingConsistency {
        writes: AtomicUsize,
        pre_commits: AtomicUsize,
    }

    impl ReplicaConsistency<TestConn> for CountingConsistency {
        fn write(&self, main: &mut TestConn) -> Result<()> {
            assert_eq!(main.node, Node::Main);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn pre_commit(&self, _main: &mut TestConn) -> Result<()> {
            self.pre_commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn is_consistent(&self, _replica: &mut dyn ConnectionSupplier<TestConn>) -> Result<bool> {
            Ok(true)
        }
    }

    struct RecordingObserver {
        decisions: Mutex<Vec<(Option<String>, RouteDecision)>>,
    }

    impl RouteObserver for RecordingObserver {
        fn on_decision(&self, sql: Option<&str>, decision: &RouteDecision) {
            self.decisions
                .lock()
                .unwrap()
                .push((sql.map(String::from), decision.clone()));
        }
    }

    fn router_with(
        consistency: Arc<CountingConsistency>,
        observer: Arc<RecordingObserver>,
    ) -> DualRouter<TestProvider, TestStatement> {
        DualRouter::builder(
            TestProvider,
            |connection: &mut TestConn| {
                Ok(TestStatement {
                    node: connection.node,
                })
            },
            consistency as Arc<dyn ReplicaConsistency<TestConn>>,
        )
        .breaker(Arc::new(ClosedBreaker))
        .observer(observer)
        .build()
    }

    fn fixtures() -> (Arc<CountingConsistency>, Arc<RecordingObserver>) {
        (
            Arc::new(CountingConsistency {
                writes: AtomicUsize::new(0),
                pre_commits: AtomicUsize::new(0),
            }),
            Arc::new(RecordingObserver {
                decisions: Mutex::new(Vec::new()),
            }),
        )
    }

    #[test]
    fn read_goes_to_replica_and_observer_sees_it() {
        let (consistency, observer) = fixtures();
        let mut router = router_with(Arc::clone(&consistency), Arc::clone(&observer));

        let statement = router.read_statement("SELECT 1").unwrap();
        assert_eq!(statement.node, Node::Replica);

        let decisions = observer.decisions.lock().unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].0.as_deref(), Some("SELECT 1"));
        assert_eq!(decisions[0].1.reason(), Reason::ReadOperation);
    }

    #[test]
    fn write_statement_routes_to_main_and_records_write() {
        let (consistency, observer) = fixtures();
        let mut router = router_with(Arc::clone(&consistency), Arc::clone(&observer));

        let statement = router.write_statement("UPDATE t SET x = 1").unwrap();
        assert_eq!(statement.node, Node::Main);
        router.record_write().unwrap();
        assert_eq!(consistency.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_decision_tracks_dispatches() {
        let (consistency, observer) = fixtures();
        let mut router = router_with(consistency, observer);

        router.read_statement("SELECT 1").unwrap();
        assert_eq!(
            router.last_decision().unwrap().reason(),
            Reason::ReadOperation
        );

        router.write_statement("DELETE FROM t").unwrap();
        assert_eq!(router.last_decision().unwrap().reason(), Reason::RwApiCall);
    }

    #[test]
    fn pre_commit_is_noop_before_main() {
        let (consistency, observer) = fixtures();
        let mut router = router_with(Arc::clone(&consistency), observer);

        router.pre_commit().unwrap();
        assert_eq!(consistency.pre_commits.load(Ordering::SeqCst), 0);

        router.write_statement("UPDATE t SET x = 1").unwrap();
        router.pre_commit().unwrap();
        assert_eq!(consistency.pre_commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let (consistency, observer) = fixtures();
        let mut router = router_with(consistency, observer);

        router.read_statement("SELECT 1").unwrap();
        router.close();
        router.close();
        assert_eq!(router.state(), ConnectionState::Closed);
        assert!(router.read_statement("SELECT 1").is_err());
    }

    #[test]
    fn report_failure_feeds_the_breaker() {
        let (consistency, observer) = fixtures();
        let breaker = Arc::new(BreakOnUnsupportedOperations::new());
        let mut router = DualRouter::builder(
            TestProvider,
            |connection: &mut TestConn| {
                Ok(TestStatement {
                    node: connection.node,
                })
            },
            consistency as Arc<dyn ReplicaConsistency<TestConn>>,
        )
        .breaker(Arc::clone(&breaker) as Arc<dyn CircuitBreaker>)
        .observer(observer)
        .build();

        router.report_failure(&DriverError::unsupported("cursors"));

        // The trip disables replica routing for new reads.
        let statement = router.read_statement("SELECT 1").unwrap();
        assert_eq!(statement.node, Node::Main);
    }
}
