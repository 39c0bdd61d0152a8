//! Propagation-window consistency: no replica I/O at all.
//!
//! Assumes writes propagate from main to replicas within a fixed window.
//! When the time of the last write is unknown, it pessimistically assumes a
//! write just happened; that errs towards more false "inconsistent" answers,
//! never towards a stale read.

use super::cache::{Cache, MonotonicCache};
use super::ReplicaConsistency;
use crate::config::PropagationConfig;
use crate::driver::ConnectionSupplier;
use crate::error::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Measures the flow of time.
///
/// Exists so tests can move time forward without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Assumes a replica is consistent once the propagation window has elapsed
/// since the last (known or assumed) write.
pub struct PessimisticPropagationConsistency {
    clock: Arc<dyn Clock>,
    max_propagation: Duration,
    last_write: MonotonicCache<Instant>,
}

impl PessimisticPropagationConsistency {
    pub fn new(config: PropagationConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: PropagationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_propagation: config.max_propagation,
            last_write: MonotonicCache::new(),
        }
    }

    /// Known or assumed time of the last write.
    ///
    /// An unknown last write is assumed to have just happened, and that
    /// assumption is cached so the window starts counting down now instead
    /// of resetting on every check.
    fn assume_last_write(&self) -> Instant {
        if let Some(known) = self.last_write.get() {
            return known;
        }
        let now = self.clock.now();
        self.last_write.put(now);
        now
    }
}

impl<C> ReplicaConsistency<C> for PessimisticPropagationConsistency {
    fn write(&self, _main: &mut C) -> Result<()> {
        self.last_write.put(self.clock.now());
        Ok(())
    }

    fn is_consistent(&self, _replica: &mut dyn ConnectionSupplier<C>) -> Result<bool> {
        let assumed_refresh = self.clock.now().checked_sub(self.max_propagation);
        let assumed_write = self.assume_last_write();
        Ok(assumed_refresh.is_some_and(|refresh| refresh > assumed_write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ConnectionSupplier, DriverResult};
    use std::sync::Mutex;

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now() + Duration::from_secs(3600)),
            })
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    struct NoConn;

    struct PanickingSupplier;

    impl ConnectionSupplier<NoConn> for PanickingSupplier {
        fn connection(&mut self) -> DriverResult<&mut NoConn> {
            panic!("pessimistic consistency must never open a connection");
        }
    }

    fn consistency(clock: Arc<ManualClock>) -> PessimisticPropagationConsistency {
        PessimisticPropagationConsistency::with_clock(
            PropagationConfig {
                max_propagation: Duration::from_millis(100),
            },
            clock,
        )
    }

    #[test]
    fn unknown_last_write_is_assumed_recent() {
        let clock = ManualClock::new();
        let consistency = consistency(Arc::clone(&clock));
        let mut supplier = PanickingSupplier;
        assert!(!ReplicaConsistency::<NoConn>::is_consistent(&consistency, &mut supplier).unwrap());
    }

    #[test]
    fn assumption_is_cached_so_window_eventually_elapses() {
        let clock = ManualClock::new();
        let consistency = consistency(Arc::clone(&clock));
        let mut supplier = PanickingSupplier;

        assert!(!ReplicaConsistency::<NoConn>::is_consistent(&consistency, &mut supplier).unwrap());
        clock.advance(Duration::from_millis(150));
        assert!(ReplicaConsistency::<NoConn>::is_consistent(&consistency, &mut supplier).unwrap());
    }

    #[test]
    fn fresh_write_is_inconsistent_until_window_elapses() {
        let clock = ManualClock::new();
        let consistency = consistency(Arc::clone(&clock));
        let mut supplier = PanickingSupplier;

        clock.advance(Duration::from_secs(10));
        consistency.write(&mut NoConn).unwrap();
        assert!(!ReplicaConsistency::<NoConn>::is_consistent(&consistency, &mut supplier).unwrap());

        clock.advance(Duration::from_millis(99));
        assert!(!ReplicaConsistency::<NoConn>::is_consistent(&consistency, &mut supplier).unwrap());

        clock.advance(Duration::from_millis(2));
        assert!(ReplicaConsistency::<NoConn>::is_consistent(&consistency, &mut supplier).unwrap());
    }
}
