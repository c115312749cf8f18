use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use crate::ambient::AmbientContext;
use crate::provider::SessionProvider;

/// State of one logical execution context, threaded explicitly through the
/// factory and its units of work.
///
/// Holds the session provider repositories read from, the pointer to the
/// currently open root unit of work and the ambient transaction slot.
pub struct UnitOfWorkContext<S> {
    provider: Arc<SessionProvider<S>>,
    root: Mutex<Option<Uuid>>,
    ambient: Arc<AmbientContext>,
}

impl<S> UnitOfWorkContext<S> {
    /// Create a new context with its own ambient transaction slot.
    pub fn new() -> Arc<Self> {
        Self::with_ambient(AmbientContext::new())
    }

    /// Create a new context sharing `ambient` with other contexts.
    pub fn with_ambient(ambient: Arc<AmbientContext>) -> Arc<Self> {
        Arc::new(Self {
            provider: Arc::new(SessionProvider::new()),
            root: Mutex::new(None),
            ambient,
        })
    }

    /// The provider repositories of synchronous units of work read from.
    pub fn provider(&self) -> &Arc<SessionProvider<S>> {
        &self.provider
    }

    /// The ambient transaction slot of this context.
    pub fn ambient(&self) -> &Arc<AmbientContext> {
        &self.ambient
    }

    /// Id of the currently open root unit of work.
    pub fn root(&self) -> Option<Uuid> {
        *self.root.lock()
    }

    /// Whether a root unit of work is open.
    pub fn has_root(&self) -> bool {
        self.root.lock().is_some()
    }

    pub(crate) fn set_root(&self, id: Uuid) {
        *self.root.lock() = Some(id);
    }

    /// Clears the root pointer if it still points at `id`.
    pub(crate) fn clear_root(&self, id: Uuid) {
        let mut root = self.root.lock();
        if *root == Some(id) {
            *root = None;
        }
    }
}
