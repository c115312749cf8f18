//! In-memory persistence backend.
//!
//! Rows are stored as JSON values in persistent maps, so a transaction
//! snapshot is a cheap clone of the committed tables.

mod database;
mod session;

pub use database::{Fault, MemoryDatabase};
pub use session::{MemorySession, MemoryTransaction};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::session::{AsyncSessionFactory, SessionFactory};
use crate::{ConnectionDescriptor, DalError};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Session {0} has been released")]
    Released(Uuid),

    #[error("Session {0} already has an active transaction")]
    AlreadyInTransaction(Uuid),

    #[error("Transaction has already finished")]
    TransactionFinished,

    #[error("Duplicate key {key} in {set}")]
    DuplicateKey { set: &'static str, key: String },

    #[error("No row with key {key} in {set}")]
    NotFound { set: &'static str, key: String },

    #[error("Injected {0:?} failure")]
    Injected(Fault),

    #[error("Row serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Ambient(#[from] DalError),
}

/// Opens [`MemorySession`]s over one shared [`MemoryDatabase`].
#[derive(Clone)]
pub struct MemorySessionFactory {
    database: Arc<MemoryDatabase>,
}

impl MemorySessionFactory {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    fn open(&self, descriptor: &ConnectionDescriptor) -> Result<MemorySession, MemoryError> {
        if self.database.take_fault(Fault::Connect) {
            return Err(MemoryError::Injected(Fault::Connect));
        }
        debug!(%descriptor, database = self.database.name(), "Opening memory session");
        Ok(MemorySession::open(Arc::clone(&self.database)))
    }
}

impl SessionFactory for MemorySessionFactory {
    type Session = MemorySession;

    fn create(&self, descriptor: &ConnectionDescriptor) -> Result<MemorySession, MemoryError> {
        self.open(descriptor)
    }
}

#[async_trait]
impl AsyncSessionFactory for MemorySessionFactory {
    type Session = MemorySession;

    async fn create(&self, descriptor: &ConnectionDescriptor) -> Result<MemorySession, MemoryError> {
        self.open(descriptor)
    }
}
