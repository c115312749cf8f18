use parking_lot::RwLock;
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ambient::{AmbientContext, AmbientTransaction};
use crate::provider::SessionProvider;
use crate::async_repository::{AsyncEntityStore, AsyncRepository};
use crate::repository::Entity;
use crate::session::{AsyncPersistenceSession, AsyncSessionFactory, AsyncTransactionHandle, ConnectionDescriptor};
use crate::strategy::{NestingStrategy, TransactionPlan};
use crate::transaction_aware::{notify_commit, notify_rollback, TransactionAware};
use crate::{DalError, DalResult, ExceptionTranslator, IsolationLevel, TransactionOption};

enum AsyncTransactionSlot<T> {
    None,
    Explicit(T),
    Enlisted(Arc<AmbientTransaction>),
}

/// Self-contained asynchronous unit of work.
///
/// Acquires its own session and binds it into a private [`SessionProvider`],
/// so several async units of work can be open on the same context at once.
/// They compose only through the ambient transaction.
///
/// Call [`AsyncUnitOfWork::dispose`] when done. Dropping an undisposed unit
/// of work clears its provider at once and hands rollback, release and the
/// rollback notification to the current tokio runtime.
pub struct AsyncUnitOfWork<S: AsyncPersistenceSession> {
    id: Uuid,
    provider: Arc<SessionProvider<S>>,
    session: Option<Arc<S>>,
    option: TransactionOption,
    isolation: IsolationLevel,
    transaction: AsyncTransactionSlot<S::Transaction>,
    observers: RwLock<Vec<Arc<dyn TransactionAware>>>,
    was_committed: bool,
    disposed: bool,
}

impl<S: AsyncPersistenceSession> AsyncUnitOfWork<S> {
    /// Creates a session through `factory` and opens the unit of work over it.
    pub async fn begin<F>(
        factory: &F,
        descriptor: &ConnectionDescriptor,
        ambient: &AmbientContext,
        strategy: &dyn NestingStrategy,
        option: TransactionOption,
        isolation: IsolationLevel,
    ) -> DalResult<Self>
    where
        F: AsyncSessionFactory<Session = S> + ?Sized,
    {
        let session = Arc::new(ExceptionTranslator::wrap_future(factory.create(descriptor)).await?);
        let provider = Arc::new(SessionProvider::new());
        provider.bind(Arc::clone(&session))?;

        let plan = strategy.plan_async(
            ambient.current(),
            option,
            isolation,
            session.supports_enlistment(),
        );

        let mut uow = Self {
            id: Uuid::new_v4(),
            provider,
            session: Some(session),
            option,
            isolation,
            transaction: AsyncTransactionSlot::None,
            observers: RwLock::new(Vec::new()),
            was_committed: false,
            disposed: false,
        };

        if let Err(err) = uow.open(plan).await {
            uow.dispose().await;
            return Err(err);
        }

        debug!(uow_id = %uow.id, %isolation, ?option, "Async unit of work opened");
        Ok(uow)
    }

    async fn open(&mut self, plan: TransactionPlan) -> DalResult<()> {
        let session = self.current_session()?;
        self.transaction = match plan {
            TransactionPlan::Explicit(level) | TransactionPlan::OwnScope(level) => {
                let tx = ExceptionTranslator::wrap_future(session.begin_transaction(level)).await?;
                AsyncTransactionSlot::Explicit(tx)
            }
            TransactionPlan::Join(ambient) => {
                ExceptionTranslator::wrap_future(session.enlist(&ambient)).await?;
                AsyncTransactionSlot::Enlisted(ambient)
            }
            TransactionPlan::Autocommit => AsyncTransactionSlot::None,
        };
        Ok(())
    }

    fn current_session(&self) -> DalResult<Arc<S>> {
        self.session.clone().ok_or(DalError::Disposed(self.id))
    }

    /// Unique id of this unit of work.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether [`AsyncUnitOfWork::commit`] succeeded.
    pub fn was_committed(&self) -> bool {
        self.was_committed
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn scope_option(&self) -> TransactionOption {
        self.option
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Whether this unit of work opened its own explicit transaction.
    pub fn owns_transaction(&self) -> bool {
        matches!(self.transaction, AsyncTransactionSlot::Explicit(_))
    }

    /// Whether this unit of work joined an ambient transaction.
    pub fn is_enlisted(&self) -> bool {
        matches!(self.transaction, AsyncTransactionSlot::Enlisted(_))
    }

    /// The private provider this unit of work's repositories read from.
    pub fn provider(&self) -> &Arc<SessionProvider<S>> {
        &self.provider
    }

    /// Registers a component to be notified when the outcome is final.
    pub fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    /// Creates a repository bound to this unit of work.
    pub fn create_repository<T>(&self) -> AsyncRepository<T, S>
    where
        T: Entity,
        S: AsyncEntityStore,
    {
        AsyncRepository::new(Arc::clone(&self.provider))
    }

    /// Saves all changes: flushes the session and commits the transaction
    /// this unit of work owns.
    pub async fn commit(&mut self) -> DalResult<()> {
        if self.was_committed {
            return Err(DalError::AlreadyCommitted);
        }
        let session = self.current_session()?;

        let flushed = ExceptionTranslator::wrap_future(session.flush()).await?;
        if let AsyncTransactionSlot::Explicit(tx) = &mut self.transaction {
            ExceptionTranslator::wrap_future(tx.commit()).await?;
        }

        self.provider.clear();
        self.was_committed = true;
        debug!(uow_id = %self.id, flushed, "Async unit of work committed");

        notify_commit(&self.observers.read());
        Ok(())
    }

    /// Releases the unit of work. Idempotent.
    ///
    /// Rolls back an uncommitted transaction (best effort), then releases the
    /// transaction handle and the session.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.provider.clear();

        let transaction = mem::replace(&mut self.transaction, AsyncTransactionSlot::None);
        release(self.id, self.session.take(), transaction, self.was_committed).await;

        debug!(uow_id = %self.id, committed = self.was_committed, "Async unit of work disposed");
        if !self.was_committed {
            notify_rollback(&self.observers.read());
        }
    }
}

async fn release<S: AsyncPersistenceSession>(
    id: Uuid,
    session: Option<Arc<S>>,
    transaction: AsyncTransactionSlot<S::Transaction>,
    committed: bool,
) {
    if let AsyncTransactionSlot::Explicit(mut tx) = transaction {
        if !committed {
            if let Err(err) = tx.rollback().await {
                let err = ExceptionTranslator::wrap(err);
                warn!(uow_id = %id, error = %err, "Rollback failed while disposing async unit of work");
            }
        }
        tx.release().await;
    }
    if let Some(session) = session {
        session.release().await;
    }
}

impl<S: AsyncPersistenceSession> Drop for AsyncUnitOfWork<S> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.provider.clear();

        let id = self.id;
        let committed = self.was_committed;
        let session = self.session.take();
        let transaction = mem::replace(&mut self.transaction, AsyncTransactionSlot::None);
        let observers = mem::take(&mut *self.observers.write());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release(id, session, transaction, committed).await;
                    if !committed {
                        notify_rollback(&observers);
                    }
                });
            }
            Err(_) => {
                warn!(uow_id = %id, "Async unit of work dropped outside a runtime; rollback skipped, observers not notified");
            }
        }
    }
}
