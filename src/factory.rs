use std::sync::Arc;
use tracing::debug;

use crate::async_unit_of_work::AsyncUnitOfWork;
use crate::config::DalConfig;
use crate::context::UnitOfWorkContext;
use crate::provider::SessionProvider;
use crate::session::{AsyncSessionFactory, SessionFactory};
use crate::strategy::{ContextState, NestingStrategy, Placement};
use crate::unit_of_work::{SessionHandle, UnitOfWork};
use crate::{DalResult, ExceptionTranslator, IsolationLevel, TransactionOption};

/// Creates units of work and decides, for each one, whether it is a root
/// owning the transaction or nested inside the open root.
pub struct UnitOfWorkFactory<F: SessionFactory> {
    sessions: Arc<F>,
    context: Arc<UnitOfWorkContext<F::Session>>,
    strategy: Arc<dyn NestingStrategy>,
    config: DalConfig,
}

impl<F: SessionFactory> UnitOfWorkFactory<F> {
    /// Creates a factory over `sessions`, using the strategy and defaults
    /// from `config`.
    pub fn new(
        sessions: Arc<F>,
        context: Arc<UnitOfWorkContext<F::Session>>,
        config: DalConfig,
    ) -> Self {
        Self {
            sessions,
            context,
            strategy: config.strategy.build(),
            config,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn NestingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> &Arc<dyn NestingStrategy> {
        &self.strategy
    }

    pub fn config(&self) -> &DalConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<UnitOfWorkContext<F::Session>> {
        &self.context
    }

    /// The provider repositories of synchronous units of work read from.
    pub fn provider(&self) -> &Arc<SessionProvider<F::Session>> {
        self.context.provider()
    }

    /// Creates a unit of work with the configured isolation level and
    /// transaction option. When [`UnitOfWork::commit`] is never called,
    /// disposing it rolls back.
    pub fn create(&self) -> DalResult<UnitOfWork<F::Session>> {
        self.create_with(self.config.isolation_level, self.config.transaction_option)
    }

    pub fn create_with(
        &self,
        isolation: IsolationLevel,
        option: TransactionOption,
    ) -> DalResult<UnitOfWork<F::Session>> {
        let state = ContextState {
            has_root: self.context.has_root(),
            has_session: !self.context.provider().is_empty(),
            ambient: self.context.ambient().current(),
        };

        match self.strategy.place(&state, option, isolation) {
            Placement::Nested => {
                let root_session = self.context.provider().current_session()?;
                UnitOfWork::with_placement(
                    Arc::clone(&self.context),
                    SessionHandle::borrowed(root_session),
                    option,
                    isolation,
                    Placement::Nested,
                )
            }
            Placement::Root(plan) => {
                debug!(strategy = ?self.strategy.kind(), ?plan, "Opening root unit of work");
                let session = ExceptionTranslator::wrap_call(|| {
                    SessionFactory::create(self.sessions.as_ref(), &self.config.connection)
                })?;
                let uow = UnitOfWork::with_placement(
                    Arc::clone(&self.context),
                    SessionHandle::owned(Arc::new(session)),
                    option,
                    isolation,
                    Placement::Root(plan),
                )?;
                self.context.set_root(uow.id());
                Ok(uow)
            }
        }
    }
}

impl<F> UnitOfWorkFactory<F>
where
    F: SessionFactory + AsyncSessionFactory,
{
    /// Creates a self-contained asynchronous unit of work with the configured
    /// defaults.
    pub async fn create_async(&self) -> DalResult<AsyncUnitOfWork<<F as AsyncSessionFactory>::Session>> {
        self.create_async_with(self.config.isolation_level, self.config.transaction_option)
            .await
    }

    pub async fn create_async_with(
        &self,
        isolation: IsolationLevel,
        option: TransactionOption,
    ) -> DalResult<AsyncUnitOfWork<<F as AsyncSessionFactory>::Session>> {
        AsyncUnitOfWork::begin(
            self.sessions.as_ref(),
            &self.config.connection,
            self.context.ambient(),
            self.strategy.as_ref(),
            option,
            isolation,
        )
        .await
    }
}

impl<F: SessionFactory> Clone for UnitOfWorkFactory<F> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            context: Arc::clone(&self.context),
            strategy: Arc::clone(&self.strategy),
            config: self.config.clone(),
        }
    }
}
