//! PostgreSQL backend.
//!
//! Asynchronous only. A [`PgSession`] holds one pooled connection, and its
//! transactions are plain `BEGIN`/`COMMIT`/`ROLLBACK` statements on that
//! connection. Sessions cannot join an ambient transaction, so async units of
//! work fall back to an explicit transaction.
//!
//! Each entity set is a table of `(key TEXT PRIMARY KEY, body JSONB)` rows,
//! created with [`PgSessionFactory::create_entity_set`]. Repository writes run
//! as soon as they are issued; flushing only reports how many rows they
//! touched.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ambient::AmbientTransaction;
use crate::async_repository::AsyncEntityStore;
use crate::executor::Executor;
use crate::repository::Entity;
use crate::session::{AsyncPersistenceSession, AsyncSessionFactory, AsyncTransactionHandle};
use crate::{ConnectionDescriptor, IsolationLevel};

#[derive(Debug, thiserror::Error)]
pub enum PgSessionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session {0} has been released")]
    Released(Uuid),

    #[error("Session {0} already has an active transaction")]
    AlreadyInTransaction(Uuid),

    #[error("Postgres sessions cannot enlist in an ambient transaction")]
    EnlistmentUnsupported,

    #[error("Transaction has already finished")]
    Finished,

    #[error("Entity {key} already exists in {set}")]
    DuplicateKey { set: &'static str, key: String },

    #[error("Entity {key} not found in {set}")]
    NotFound { set: &'static str, key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opens [`PgSession`]s from a shared pool.
#[derive(Clone)]
pub struct PgSessionFactory {
    pool: Arc<PgPool>,
}

impl PgSessionFactory {
    /// Create a new factory over a shared pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<PgPool> {
        &self.pool
    }

    /// Creates the table backing `T`'s entity set if it does not exist.
    pub async fn create_entity_set<T: Entity>(&self) -> Result<(), PgSessionError> {
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (key TEXT PRIMARY KEY, body JSONB NOT NULL)"#,
            T::SET
        );
        sqlx::query(&sql).execute(self.pool.as_ref()).await?;
        Ok(())
    }
}

#[async_trait]
impl AsyncSessionFactory for PgSessionFactory {
    type Session = PgSession;

    async fn create(&self, descriptor: &ConnectionDescriptor) -> Result<PgSession, PgSessionError> {
        let conn = self.pool.acquire().await?;
        let session = PgSession {
            id: Uuid::new_v4(),
            executor: Executor::new(conn),
            released: AtomicBool::new(false),
        };
        debug!(session_id = %session.id, %descriptor, "Postgres session opened");
        Ok(session)
    }
}

/// A Postgres session holding one pooled connection.
pub struct PgSession {
    id: Uuid,
    executor: Executor,
    released: AtomicBool,
}

impl PgSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The executor repositories run their statements on.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    fn ensure_open(&self) -> Result<(), PgSessionError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PgSessionError::Released(self.id));
        }
        Ok(())
    }

    async fn write(&self, sql: &str, args: &[String]) -> Result<u64, PgSessionError> {
        self.ensure_open()?;
        let rows = self.executor.execute(sql, args).await?;
        self.executor.record_changes(rows);
        Ok(rows)
    }

    async fn read<T: Entity>(&self, sql: &str, args: &[String]) -> Result<Vec<T>, PgSessionError> {
        self.ensure_open()?;
        let bodies = self.executor.fetch_texts(sql, args).await?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(PgSessionError::from))
            .collect()
    }

    async fn upsert<T: Entity>(&self, entity: &T) -> Result<u64, PgSessionError> {
        let sql = format!(
            r#"INSERT INTO "{}" (key, body) VALUES ($1, $2::jsonb)
               ON CONFLICT (key) DO UPDATE SET body = EXCLUDED.body"#,
            T::SET
        );
        self.write(&sql, &[key_of::<T>(&entity.key())?, serde_json::to_string(entity)?])
            .await
    }

    async fn remove<T: Entity>(&self, key: String) -> Result<(), PgSessionError> {
        let sql = format!(r#"DELETE FROM "{}" WHERE key = $1"#, T::SET);
        if self.write(&sql, std::slice::from_ref(&key)).await? == 0 {
            return Err(PgSessionError::NotFound { set: T::SET, key });
        }
        Ok(())
    }
}

fn key_of<T: Entity>(key: &T::Key) -> Result<String, PgSessionError> {
    Ok(serde_json::to_string(key)?)
}

#[async_trait]
impl AsyncEntityStore for PgSession {
    type Error = PgSessionError;

    async fn load_all<T: Entity>(&self) -> Result<Vec<T>, PgSessionError> {
        let sql = format!(r#"SELECT body::text FROM "{}" ORDER BY key"#, T::SET);
        self.read(&sql, &[]).await
    }

    async fn find<T: Entity>(&self, key: &T::Key) -> Result<Option<T>, PgSessionError> {
        let sql = format!(r#"SELECT body::text FROM "{}" WHERE key = $1"#, T::SET);
        let found = self.read::<T>(&sql, &[key_of::<T>(key)?]).await?;
        Ok(found.into_iter().next())
    }

    async fn track_add<T: Entity>(&self, entity: T) -> Result<(), PgSessionError> {
        let key = key_of::<T>(&entity.key())?;
        let sql = format!(r#"INSERT INTO "{}" (key, body) VALUES ($1, $2::jsonb)"#, T::SET);
        match self.write(&sql, &[key.clone(), serde_json::to_string(&entity)?]).await {
            Err(PgSessionError::Database(sqlx::Error::Database(db))) if db.is_unique_violation() => {
                Err(PgSessionError::DuplicateKey { set: T::SET, key })
            }
            other => other.map(|_| ()),
        }
    }

    async fn track_upsert<T: Entity>(&self, entity: T) -> Result<(), PgSessionError> {
        self.upsert(&entity).await.map(|_| ())
    }

    async fn track_update<T: Entity>(&self, entity: T) -> Result<(), PgSessionError> {
        let key = key_of::<T>(&entity.key())?;
        let sql = format!(r#"UPDATE "{}" SET body = $2::jsonb WHERE key = $1"#, T::SET);
        if self.write(&sql, &[key.clone(), serde_json::to_string(&entity)?]).await? == 0 {
            return Err(PgSessionError::NotFound { set: T::SET, key });
        }
        Ok(())
    }

    async fn track_remove<T: Entity>(&self, key: &T::Key) -> Result<(), PgSessionError> {
        self.remove::<T>(key_of::<T>(key)?).await
    }

    async fn execute_delete<T: Entity>(
        &self,
        filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
    ) -> Result<usize, PgSessionError> {
        let doomed: Vec<T> = AsyncEntityStore::load_all::<T>(self)
            .await?
            .into_iter()
            .filter(|e| filter(e))
            .collect();
        for entity in &doomed {
            self.remove::<T>(key_of::<T>(&entity.key())?).await?;
        }
        Ok(doomed.len())
    }

    async fn execute_update<T: Entity>(
        &self,
        filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
        updater: &(dyn Fn(T) -> T + Send + Sync),
    ) -> Result<usize, PgSessionError> {
        let matching: Vec<T> = AsyncEntityStore::load_all::<T>(self)
            .await?
            .into_iter()
            .filter(|e| filter(e))
            .collect();
        let count = matching.len();
        for entity in matching {
            let old_key = key_of::<T>(&entity.key())?;
            let updated = updater(entity);
            if key_of::<T>(&updated.key())? != old_key {
                self.remove::<T>(old_key).await?;
            }
            self.upsert(&updated).await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl AsyncPersistenceSession for PgSession {
    type Error = PgSessionError;
    type Transaction = PgTransaction;

    /// Statements run as soon as repositories issue them, so flushing only
    /// reports how many rows they touched since the last flush.
    async fn flush(&self) -> Result<usize, PgSessionError> {
        self.ensure_open()?;
        Ok(self.executor.take_changes())
    }

    async fn begin_transaction(&self, isolation: IsolationLevel) -> Result<PgTransaction, PgSessionError> {
        self.ensure_open()?;
        if self.executor.in_transaction() {
            return Err(PgSessionError::AlreadyInTransaction(self.id));
        }
        self.executor
            .run(&format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql()))
            .await?;
        self.executor.set_in_transaction(true);
        debug!(session_id = %self.id, %isolation, "Postgres transaction started");
        Ok(PgTransaction {
            executor: self.executor.clone(),
            finished: false,
        })
    }

    async fn enlist(&self, _ambient: &Arc<AmbientTransaction>) -> Result<(), PgSessionError> {
        Err(PgSessionError::EnlistmentUnsupported)
    }

    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.executor.in_transaction() {
            if let Err(err) = self.executor.run("ROLLBACK").await {
                warn!(session_id = %self.id, error = %err, "Rollback failed while releasing session");
            }
            self.executor.set_in_transaction(false);
        }
        drop(self.executor.take_connection().await);
        debug!(session_id = %self.id, "Postgres session released");
    }
}

pub struct PgTransaction {
    executor: Executor,
    finished: bool,
}

impl PgTransaction {
    /// Flags are only cleared once the statement succeeded, so a failed or
    /// cancelled `COMMIT` still gets a `ROLLBACK` on release.
    async fn finish(&mut self, statement: &str) -> Result<(), PgSessionError> {
        self.executor.run(statement).await?;
        self.finished = true;
        self.executor.set_in_transaction(false);
        Ok(())
    }
}

#[async_trait]
impl AsyncTransactionHandle for PgTransaction {
    type Error = PgSessionError;

    async fn commit(&mut self) -> Result<(), PgSessionError> {
        if self.finished {
            return Err(PgSessionError::Finished);
        }
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), PgSessionError> {
        if self.finished {
            return Ok(());
        }
        self.finish("ROLLBACK").await
    }

    async fn release(&mut self) {
        if !self.finished {
            if let Err(err) = self.finish("ROLLBACK").await {
                warn!(error = %err, "Rollback failed while releasing transaction");
            }
        }
    }
}
