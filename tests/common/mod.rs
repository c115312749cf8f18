#![allow(dead_code)]

pub mod entities;
pub mod observers;

pub use entities::{Blog, Post};
pub use observers::RecordingObserver;

use dal_unit_of_work::memory::{MemoryDatabase, MemorySession, MemorySessionFactory};
use dal_unit_of_work::{DalConfig, DalError, Entity, Repository, UnitOfWorkContext, UnitOfWorkFactory};
use std::sync::Arc;

pub type MemoryFactory = UnitOfWorkFactory<MemorySessionFactory>;

/// Installs a test-writer subscriber once; `RUST_LOG` controls the output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Setup a factory over a fresh in-memory database
pub fn setup() -> (Arc<MemoryDatabase>, MemoryFactory) {
    setup_with(DalConfig::default())
}

pub fn setup_with(config: DalConfig) -> (Arc<MemoryDatabase>, MemoryFactory) {
    init_tracing();
    let database = MemoryDatabase::new("test");
    let sessions = Arc::new(MemorySessionFactory::new(Arc::clone(&database)));
    let factory = UnitOfWorkFactory::new(sessions, UnitOfWorkContext::new(), config);
    (database, factory)
}

/// Repository bound to the factory's provider
pub fn repository<T: Entity>(factory: &MemoryFactory) -> Repository<T, MemorySession> {
    Repository::new(Arc::clone(factory.provider()))
}

/// Counts committed blogs through a fresh unit of work
pub fn committed_blogs(factory: &MemoryFactory) -> usize {
    let uow = factory.create().expect("Failed to open verify unit of work");
    let count = repository::<Blog>(factory)
        .count()
        .expect("Failed to count blogs");
    drop(uow);
    count
}

/// Source of a persistence error, downcast to the backend's error type
pub fn persistence_source<E: std::error::Error + 'static>(err: &DalError) -> Option<&E> {
    match err {
        DalError::Persistence { source, .. } => source.downcast_ref::<E>(),
        _ => None,
    }
}
