//! Unit of Work data access layer
//!
//! Groups repository operations against a shared persistence session into
//! transactional units of work. A [`UnitOfWorkFactory`] decides whether each
//! new unit of work is a root, owning the session and the transaction, or
//! nested inside the open root. Repositories resolve the current session
//! through a [`SessionProvider`] and never manage transactions themselves.

pub mod ambient;
pub mod async_repository;
pub mod async_unit_of_work;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod factory;
pub mod memory;
pub mod postgres;
pub mod provider;
pub mod repository;
pub mod session;
pub mod strategy;
pub mod transaction_aware;
pub mod unit_of_work;

pub use ambient::{AmbientContext, AmbientOutcome, AmbientTransaction, Enlistment, TransactionScope};
pub use async_repository::{AsyncEntityStore, AsyncRepository};
pub use async_unit_of_work::AsyncUnitOfWork;
pub use config::DalConfig;
pub use context::UnitOfWorkContext;
pub use error::{BoxError, DalError, DalResult, ExceptionTranslator};
pub use executor::Executor;
pub use factory::UnitOfWorkFactory;
pub use provider::SessionProvider;
pub use repository::{Entity, EntityStore, Page, Repository};
pub use session::{
    AsyncPersistenceSession, AsyncSessionFactory, AsyncTransactionHandle, ConnectionDescriptor,
    IsolationLevel, PersistenceSession, SessionFactory, TransactionHandle, TransactionOption,
};
pub use strategy::{
    AmbientJoinStrategy, ExplicitRootTrackingStrategy, NestingStrategy, Placement, StrategyKind,
    TransactionPlan,
};
pub use transaction_aware::TransactionAware;
pub use unit_of_work::{SessionHandle, UnitOfWork};
