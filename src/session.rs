//! Contracts the unit of work consumes from the persistence layer.
//!
//! A persistence session is supplied by an ORM-like backend: it tracks entity
//! changes, flushes them on demand and participates in a transaction. The
//! crate ships two backends ([`crate::memory`] and [`crate::postgres`]), but the
//! unit of work only ever talks to these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::ambient::AmbientTransaction;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    #[default]
    Serializable,
}

impl IsolationLevel {
    /// Returns the SQL representation.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Whether reads inside a transaction should come from a begin-time snapshot.
    pub fn uses_snapshot(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Describes what a unit of work requires from the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOption {
    /// Run inside whatever ambient transaction exists. The transaction can be
    /// driven from outside.
    Current,
    /// Open a new transaction for the unit of work.
    #[default]
    New,
}

/// Opaque connection descriptor handed to the session factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionDescriptor(String);

impl ConnectionDescriptor {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self::new("memory://default")
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An explicit transaction opened on a session.
pub trait TransactionHandle: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Makes every change flushed inside the transaction durable.
    fn commit(&mut self) -> Result<(), Self::Error>;

    /// Discards every change flushed inside the transaction.
    fn rollback(&mut self) -> Result<(), Self::Error>;

    /// Releases the handle. An unfinished transaction is rolled back.
    fn release(&mut self);
}

/// A connected, change-tracking database session.
pub trait PersistenceSession: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    type Transaction: TransactionHandle<Error = Self::Error>;

    /// Writes pending changes into the current write scope and returns how
    /// many were written.
    fn flush(&self) -> Result<usize, Self::Error>;

    fn begin_transaction(&self, isolation: IsolationLevel)
        -> Result<Self::Transaction, Self::Error>;

    /// Joins an ambient transaction. Flushed changes are committed or rolled
    /// back together with it.
    fn enlist(&self, ambient: &Arc<AmbientTransaction>) -> Result<(), Self::Error>;

    /// Releases the session. Calling it more than once has no effect.
    fn release(&self);
}

/// Creates sessions for synchronous units of work.
pub trait SessionFactory: Send + Sync {
    type Session: PersistenceSession;

    fn create(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Self::Session, <Self::Session as PersistenceSession>::Error>;
}

/// Asynchronous counterpart of [`TransactionHandle`].
#[async_trait]
pub trait AsyncTransactionHandle: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn commit(&mut self) -> Result<(), Self::Error>;

    async fn rollback(&mut self) -> Result<(), Self::Error>;

    async fn release(&mut self);
}

/// Asynchronous counterpart of [`PersistenceSession`].
#[async_trait]
pub trait AsyncPersistenceSession: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    type Transaction: AsyncTransactionHandle<Error = Self::Error>;

    async fn flush(&self) -> Result<usize, Self::Error>;

    async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Self::Transaction, Self::Error>;

    /// Whether the session can join an ambient transaction across
    /// suspension points.
    fn supports_enlistment(&self) -> bool {
        false
    }

    async fn enlist(&self, ambient: &Arc<AmbientTransaction>) -> Result<(), Self::Error>;

    async fn release(&self);
}

/// Creates sessions for asynchronous units of work.
#[async_trait]
pub trait AsyncSessionFactory: Send + Sync {
    type Session: AsyncPersistenceSession;

    async fn create(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Self::Session, <Self::Session as AsyncPersistenceSession>::Error>;
}
