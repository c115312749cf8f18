use parking_lot::RwLock;
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ambient::{AmbientTransaction, TransactionScope};
use crate::context::UnitOfWorkContext;
use crate::repository::{Entity, EntityStore, Repository};
use crate::session::{PersistenceSession, TransactionHandle};
use crate::strategy::{ContextState, ExplicitRootTrackingStrategy, NestingStrategy, Placement, TransactionPlan};
use crate::transaction_aware::{notify_commit, notify_rollback, TransactionAware};
use crate::{DalError, DalResult, ExceptionTranslator, IsolationLevel, TransactionOption};

/// A session reference plus the capability to release it.
///
/// Root units of work own their session. Nested ones borrow the root's
/// session and never release it.
pub struct SessionHandle<S> {
    session: Arc<S>,
    can_release: bool,
}

impl<S> SessionHandle<S> {
    pub fn owned(session: Arc<S>) -> Self {
        Self {
            session,
            can_release: true,
        }
    }

    pub fn borrowed(session: Arc<S>) -> Self {
        Self {
            session,
            can_release: false,
        }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn can_release(&self) -> bool {
        self.can_release
    }
}

impl<S: PersistenceSession> SessionHandle<S> {
    /// Releases the session at most once, and only through an owning handle.
    fn release(&mut self) {
        if mem::take(&mut self.can_release) {
            self.session.release();
        }
    }
}

enum TransactionSlot<T> {
    None,
    Explicit(T),
    Scope(TransactionScope),
    Enlisted(Arc<AmbientTransaction>),
}

impl<T> Default for TransactionSlot<T> {
    fn default() -> Self {
        TransactionSlot::None
    }
}

/// Synchronous unit of work.
///
/// A root binds its session into the context's provider and owns the
/// transaction; a nested one only flushes the root's session on commit.
/// Dropping the unit of work disposes it, rolling back when
/// [`UnitOfWork::commit`] was never called.
pub struct UnitOfWork<S: PersistenceSession> {
    id: Uuid,
    context: Arc<UnitOfWorkContext<S>>,
    session: SessionHandle<S>,
    option: TransactionOption,
    isolation: IsolationLevel,
    nested: bool,
    transaction: TransactionSlot<S::Transaction>,
    observers: RwLock<Vec<Arc<dyn TransactionAware>>>,
    was_committed: bool,
    disposed: bool,
}

impl<S: PersistenceSession> UnitOfWork<S> {
    /// Opens a unit of work over `session`.
    ///
    /// A root (`nested == false`) binds the session into the provider, failing
    /// with [`DalError::SessionAlreadyOpen`] if one is bound, and opens an
    /// explicit transaction for [`TransactionOption::New`]. A nested unit of
    /// work touches neither.
    pub fn new(
        context: Arc<UnitOfWorkContext<S>>,
        session: SessionHandle<S>,
        option: TransactionOption,
        isolation: IsolationLevel,
        nested: bool,
    ) -> DalResult<Self> {
        let placement = if nested {
            Placement::Nested
        } else {
            let state = ContextState {
                has_root: false,
                has_session: !context.provider().is_empty(),
                ambient: context.ambient().current(),
            };
            ExplicitRootTrackingStrategy.place(&state, option, isolation)
        };
        Self::with_placement(context, session, option, isolation, placement)
    }

    /// Opens a unit of work placed by a [`NestingStrategy`].
    pub fn with_placement(
        context: Arc<UnitOfWorkContext<S>>,
        session: SessionHandle<S>,
        option: TransactionOption,
        isolation: IsolationLevel,
        placement: Placement,
    ) -> DalResult<Self> {
        let nested = matches!(placement, Placement::Nested);
        let mut uow = Self {
            id: Uuid::new_v4(),
            context,
            session,
            option,
            isolation,
            nested,
            transaction: TransactionSlot::None,
            observers: RwLock::new(Vec::new()),
            was_committed: false,
            disposed: false,
        };

        // On failure the half-open unit of work is dropped, which disposes it.
        if let Placement::Root(plan) = placement {
            uow.open_root(plan)?;
        }

        debug!(uow_id = %uow.id, nested, %isolation, ?option, "Unit of work opened");
        Ok(uow)
    }

    fn open_root(&mut self, plan: TransactionPlan) -> DalResult<()> {
        let session = Arc::clone(self.session.session());
        self.context.provider().bind(Arc::clone(&session))?;

        self.transaction = match plan {
            TransactionPlan::Explicit(level) => {
                let tx = ExceptionTranslator::wrap_call(|| session.begin_transaction(level))?;
                TransactionSlot::Explicit(tx)
            }
            TransactionPlan::Join(ambient) => {
                ExceptionTranslator::wrap_call(|| session.enlist(&ambient))?;
                TransactionSlot::Enlisted(ambient)
            }
            TransactionPlan::OwnScope(level) => {
                let scope = TransactionScope::requires_new(self.context.ambient(), level);
                ExceptionTranslator::wrap_call(|| session.enlist(scope.transaction()))?;
                TransactionSlot::Scope(scope)
            }
            TransactionPlan::Autocommit => TransactionSlot::None,
        };
        Ok(())
    }

    /// Unique id, also stored as the context's root pointer for roots.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this unit of work runs inside an open root.
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Whether [`UnitOfWork::commit`] succeeded.
    pub fn was_committed(&self) -> bool {
        self.was_committed
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// The transaction option this unit of work was created with.
    pub fn scope_option(&self) -> TransactionOption {
        self.option
    }

    /// The isolation level this unit of work was created with.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Whether this unit of work owns a transaction or an ambient scope.
    pub fn owns_transaction(&self) -> bool {
        matches!(
            self.transaction,
            TransactionSlot::Explicit(_) | TransactionSlot::Scope(_)
        )
    }

    /// The session this unit of work flushes; the root's for a nested one.
    pub fn session(&self) -> &Arc<S> {
        self.session.session()
    }

    /// The context this unit of work was opened in.
    pub fn context(&self) -> &Arc<UnitOfWorkContext<S>> {
        &self.context
    }

    /// Creates a repository reading the context's current session.
    pub fn create_repository<T>(&self) -> Repository<T, S>
    where
        T: Entity,
        S: EntityStore,
    {
        Repository::new(Arc::clone(self.context.provider()))
    }

    /// Registers a component to be notified when the outcome is final.
    pub fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    /// Saves all changes.
    ///
    /// Flushes the session; a root also finalizes the transaction it owns and
    /// clears the provider binding. A failed commit leaves the unit of work
    /// uncommitted, so disposing it still rolls back.
    pub fn commit(&mut self) -> DalResult<()> {
        if self.was_committed {
            return Err(DalError::AlreadyCommitted);
        }
        if self.disposed {
            return Err(DalError::Disposed(self.id));
        }

        let session = Arc::clone(self.session.session());
        let flushed = ExceptionTranslator::wrap_call(|| session.flush())?;

        if !self.nested {
            match &mut self.transaction {
                TransactionSlot::Explicit(tx) => ExceptionTranslator::wrap_call(|| tx.commit())?,
                TransactionSlot::Scope(scope) => scope.complete()?,
                TransactionSlot::Enlisted(_) | TransactionSlot::None => {}
            }
            self.context.provider().clear_if_bound(&session);
        }

        self.was_committed = true;
        debug!(uow_id = %self.id, nested = self.nested, flushed, "Unit of work committed");

        if !self.nested {
            notify_commit(&self.observers.read());
        }
        Ok(())
    }

    /// Releases the unit of work. Idempotent, and called on drop.
    ///
    /// A root rolls back an uncommitted transaction (best effort), releases
    /// the transaction handle and the session, and clears the provider
    /// binding and the context's root pointer.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if self.nested {
            self.session.release();
            debug!(uow_id = %self.id, nested = true, "Unit of work disposed");
            return;
        }

        let session = Arc::clone(self.session.session());
        match mem::take(&mut self.transaction) {
            TransactionSlot::Explicit(mut tx) => {
                if !self.was_committed {
                    if let Err(err) = tx.rollback() {
                        let err = ExceptionTranslator::wrap(err);
                        warn!(uow_id = %self.id, error = %err, "Rollback failed while disposing unit of work");
                    }
                }
                tx.release();
            }
            TransactionSlot::Scope(scope) => drop(scope),
            TransactionSlot::Enlisted(_) | TransactionSlot::None => {}
        }

        self.context.provider().clear_if_bound(&session);
        self.session.release();
        self.context.clear_root(self.id);

        debug!(uow_id = %self.id, committed = self.was_committed, "Unit of work disposed");

        if !self.was_committed {
            notify_rollback(&self.observers.read());
        }
    }
}

impl<S: PersistenceSession> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}
