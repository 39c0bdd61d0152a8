//! Once-computed resource slots that remember why they were filled.
//!
//! A [`LazyHandle`] is the building block behind both connection slots in
//! the state machine and both statement slots in the dispatcher: the value
//! materializes on first access, and the routing decision that triggered the
//! materialization is registered as the slot's *first cause*. Later accesses
//! with different decisions get the same value and leave the first cause
//! untouched (first writer wins), so the recorded cause is deterministic no
//! matter how many routes end up reusing the handle.
//!
//! Invariants:
//! - the value is created at most once between resets;
//! - the first cause is registered no later than the value, and survives a
//!   failed initialization (the attempt is part of the audit trail);
//! - [`reset`](LazyHandle::reset) clears both together.

use crate::decision::RouteDecisionBuilder;

/// A lazily materialized slot plus the decision that first touched it.
#[derive(Debug)]
pub struct LazyHandle<T> {
    value: Option<T>,
    first_cause: Option<RouteDecisionBuilder>,
}

impl<T> Default for LazyHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LazyHandle<T> {
    pub fn new() -> Self {
        Self {
            value: None,
            first_cause: None,
        }
    }

    /// Whether the value has materialized.
    pub fn is_materialized(&self) -> bool {
        self.value.is_some()
    }

    /// The decision that first triggered (or first attempted) materialization.
    pub fn first_cause(&self) -> Option<&RouteDecisionBuilder> {
        self.first_cause.as_ref()
    }

    /// Borrow the value if it has materialized.
    pub fn value_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    /// Materialize the value if needed and borrow it.
    ///
    /// On the materializing call, `init` runs with the caller's decision
    /// builder so routing performed inside initialization (a read falling
    /// back to main, say) is visible in the final decision. The builder's
    /// state *after* `init` is what gets registered as the first cause. On
    /// later calls `cause` is ignored and `init` never runs.
    ///
    /// A failed `init` leaves the slot empty but keeps the registered cause;
    /// the next call attempts initialization again.
    pub fn get_or_try_init<E>(
        &mut self,
        cause: &mut RouteDecisionBuilder,
        init: impl FnOnce(&mut RouteDecisionBuilder) -> Result<T, E>,
    ) -> Result<&mut T, E> {
        if self.value.is_none() {
            let result = init(cause);
            if self.first_cause.is_none() {
                self.first_cause = Some(cause.clone());
            }
            self.value = Some(result?);
        }
        Ok(self.value.as_mut().expect("materialized above"))
    }

    /// Take the value out, clearing the slot and its cause.
    ///
    /// Used during close to hand the resource to its release path.
    pub fn take(&mut self) -> Option<T> {
        self.first_cause = None;
        self.value.take()
    }

    /// Clear the value and the first cause together.
    pub fn reset(&mut self) {
        self.value = None;
        self.first_cause = None;
    }
}
