//! Small caches backing the consistency oracles.
//!
//! Two shapes:
//!
//! - [`Cache`]: a single remembered value written by the owner
//!   ([`MonotonicCache`] additionally refuses to go backwards, which is what
//!   a freshness token wants).
//! - [`SuppliedCache`]: a value produced by a loader the *reader* brings.
//!   [`ThrottledCache`] admits one loader at a time; concurrent readers get
//!   the last known value instead of piling onto the backend.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Holds a single value. Might be empty.
pub trait Cache<T>: Send + Sync {
    /// Last known value, or `None` if unknown.
    fn get(&self) -> Option<T>;

    /// Remember a value.
    fn put(&self, value: T);

    /// Forget the last known value.
    fn reset(&self);
}

/// Holds values that only grow over time, unless reset.
///
/// `put` keeps the maximum of the old and new value, so concurrent writers
/// racing with out-of-order samples cannot move a freshness marker
/// backwards.
#[derive(Debug, Default)]
pub struct MonotonicCache<T> {
    value: Mutex<Option<T>>,
}

impl<T> MonotonicCache<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

impl<T: Ord + Clone + Send> Cache<T> for MonotonicCache<T> {
    fn get(&self) -> Option<T> {
        self.value.lock().expect("monotonic cache lock").clone()
    }

    fn put(&self, value: T) {
        let mut slot = self.value.lock().expect("monotonic cache lock");
        match &*slot {
            Some(previous) if *previous >= value => {}
            _ => *slot = Some(value),
        }
    }

    fn reset(&self) {
        *self.value.lock().expect("monotonic cache lock") = None;
    }
}

/// A cache populated by a reader-supplied loader.
pub trait SuppliedCache<T>: Send + Sync {
    /// Read the value, possibly refreshing it via `loader` first.
    fn get_with(&self, loader: &mut dyn FnMut() -> Result<T>) -> Result<Option<T>>;

    /// Last remembered value without triggering a refresh.
    fn get(&self) -> Option<T>;
}

/// Every read may refresh, but only one loader runs at a time.
///
/// A reader that loses the claim gets the last known value immediately
/// rather than waiting behind the loader, which keeps consistency checks
/// off each other's backs when the backing lookup is slow.
#[derive(Debug, Default)]
pub struct ThrottledCache<T> {
    value: Mutex<Option<T>>,
    loading: AtomicBool,
}

impl<T: Clone + Send> ThrottledCache<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            loading: AtomicBool::new(false),
        }
    }
}

impl<T: Clone + Send> SuppliedCache<T> for ThrottledCache<T> {
    fn get_with(&self, loader: &mut dyn FnMut() -> Result<T>) -> Result<Option<T>> {
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Someone else is loading; serve the last known value.
            return Ok(self.get());
        }

        // The value lock is not held while loading.
        let loaded = loader();
        self.loading.store(false, Ordering::Release);

        let value = loaded?;
        *self.value.lock().expect("throttled cache lock") = Some(value.clone());
        Ok(Some(value))
    }

    fn get(&self) -> Option<T> {
        self.value.lock().expect("throttled cache lock").clone()
    }
}
