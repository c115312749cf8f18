use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::{DalError, DalResult};

/// Holds at most one active session for a logical execution context.
///
/// Repositories read the session from here; units of work bind and clear it.
/// A session has to be cleared before another one can be bound.
pub struct SessionProvider<S> {
    slot: RwLock<Option<Arc<S>>>,
}

impl<S> SessionProvider<S> {
    /// Create a new provider with no session bound.
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Returns the bound session, or [`DalError::SessionNotOpen`].
    pub fn current_session(&self) -> DalResult<Arc<S>> {
        self.slot.read().clone().ok_or(DalError::SessionNotOpen)
    }

    /// Binds (`Some`) or clears (`None`) the current session.
    ///
    /// Binding while another session is bound fails with
    /// [`DalError::SessionAlreadyOpen`].
    pub fn set_current_session(&self, session: Option<Arc<S>>) -> DalResult<()> {
        let mut slot = self.slot.write();
        if session.is_some() && slot.is_some() {
            return Err(DalError::SessionAlreadyOpen);
        }
        debug!(bound = session.is_some(), "Current session changed");
        *slot = session;
        Ok(())
    }

    /// Binds `session`. Shorthand for `set_current_session(Some(session))`.
    pub fn bind(&self, session: Arc<S>) -> DalResult<()> {
        self.set_current_session(Some(session))
    }

    /// Clears the binding and returns what was bound.
    pub fn clear(&self) -> Option<Arc<S>> {
        self.slot.write().take()
    }

    /// Clears the binding only if `session` is the one bound.
    pub(crate) fn clear_if_bound(&self, session: &Arc<S>) -> bool {
        let mut slot = self.slot.write();
        match slot.as_ref() {
            Some(bound) if Arc::ptr_eq(bound, session) => {
                debug!("Current session cleared");
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Whether no session is bound.
    pub fn is_empty(&self) -> bool {
        self.slot.read().is_none()
    }
}

impl<S> Default for SessionProvider<S> {
    fn default() -> Self {
        Self::new()
    }
}
