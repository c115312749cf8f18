use async_trait::async_trait;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::database::{Change, Fault, MemoryDatabase, Table, Tables};
use super::MemoryError;
use crate::ambient::{AmbientTransaction, Enlistment};
use crate::async_repository::AsyncEntityStore;
use crate::error::BoxError;
use crate::repository::{Entity, EntityStore};
use crate::session::{AsyncPersistenceSession, AsyncTransactionHandle, IsolationLevel, PersistenceSession, TransactionHandle};

/// Changes flushed inside a transaction or an ambient enlistment, waiting to
/// be made durable.
struct Overlay {
    base: Option<Tables>,
    changes: Vec<Change>,
    finished: bool,
}

impl Overlay {
    fn new(database: &MemoryDatabase, isolation: IsolationLevel) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            base: isolation.uses_snapshot().then(|| database.snapshot()),
            changes: Vec::new(),
            finished: false,
        }))
    }

    fn discard(&mut self) {
        self.changes.clear();
        self.finished = true;
    }
}

enum WriteScope {
    Autocommit,
    Transaction(Arc<Mutex<Overlay>>),
    Enlisted(Arc<Mutex<Overlay>>),
}

struct SessionState {
    pending: Vec<Change>,
    scope: WriteScope,
    released: bool,
}

/// Change-tracking session over a [`MemoryDatabase`].
///
/// Reads see committed state, then changes flushed into the current
/// transaction, then pending tracked changes.
pub struct MemorySession {
    id: Uuid,
    database: Arc<MemoryDatabase>,
    state: Arc<Mutex<SessionState>>,
}

impl MemorySession {
    pub fn open(database: Arc<MemoryDatabase>) -> Self {
        database.session_opened();
        let id = Uuid::new_v4();
        debug!(session_id = %id, database = database.name(), "Memory session opened");
        Self {
            id,
            database,
            state: Arc::new(Mutex::new(SessionState {
                pending: Vec::new(),
                scope: WriteScope::Autocommit,
                released: false,
            })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Tracked changes not flushed yet.
    pub fn pending_changes(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn in_transaction(&self) -> bool {
        !matches!(self.state.lock().scope, WriteScope::Autocommit)
    }

    fn flush_changes(&self) -> Result<usize, MemoryError> {
        let mut state = self.lock_open()?;
        if self.database.take_fault(Fault::Flush) {
            return Err(MemoryError::Injected(Fault::Flush));
        }
        let pending = mem::take(&mut state.pending);
        let count = pending.len();
        write_into(&self.database, &state.scope, pending)?;
        Ok(count)
    }

    fn begin(&self, isolation: IsolationLevel) -> Result<MemoryTransaction, MemoryError> {
        let mut state = self.lock_open()?;
        if !matches!(state.scope, WriteScope::Autocommit) {
            return Err(MemoryError::AlreadyInTransaction(self.id));
        }
        let overlay = Overlay::new(&self.database, isolation);
        state.scope = WriteScope::Transaction(Arc::clone(&overlay));
        debug!(session_id = %self.id, %isolation, "Memory transaction started");
        Ok(MemoryTransaction {
            database: Arc::clone(&self.database),
            session: Arc::clone(&self.state),
            overlay,
        })
    }

    fn join(&self, ambient: &Arc<AmbientTransaction>) -> Result<(), MemoryError> {
        let mut state = self.lock_open()?;
        if !matches!(state.scope, WriteScope::Autocommit) {
            return Err(MemoryError::AlreadyInTransaction(self.id));
        }
        let overlay = Overlay::new(&self.database, ambient.isolation_level());
        ambient.enlist(Box::new(MemoryEnlistment {
            database: Arc::clone(&self.database),
            overlay: Arc::clone(&overlay),
        }))?;
        state.scope = WriteScope::Enlisted(overlay);
        debug!(session_id = %self.id, ambient_id = %ambient.id(), "Memory session enlisted");
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        state.released = true;
        state.pending.clear();
        // Work enlisted in an ambient transaction outlives the session.
        if let WriteScope::Transaction(overlay) = mem::replace(&mut state.scope, WriteScope::Autocommit) {
            overlay.lock().discard();
        }
        self.database.session_released();
        debug!(session_id = %self.id, "Memory session released");
    }

    fn lock_open(&self) -> Result<parking_lot::MutexGuard<'_, SessionState>, MemoryError> {
        let state = self.state.lock();
        if state.released {
            return Err(MemoryError::Released(self.id));
        }
        Ok(state)
    }

    /// Current contents of one entity set as this session sees them.
    fn view(&self, set: &str) -> Result<Table, MemoryError> {
        let state = self.lock_open()?;
        let mut table = match &state.scope {
            WriteScope::Autocommit => self.database.table(set),
            WriteScope::Transaction(overlay) | WriteScope::Enlisted(overlay) => {
                let overlay = overlay.lock();
                let mut table = match &overlay.base {
                    Some(base) => base.get(set).cloned().unwrap_or_default(),
                    None => self.database.table(set),
                };
                apply_matching(&mut table, set, &overlay.changes);
                table
            }
        };
        apply_matching(&mut table, set, &state.pending);
        Ok(table)
    }

    fn track(&self, change: Change) -> Result<(), MemoryError> {
        self.lock_open()?.pending.push(change);
        Ok(())
    }

    fn write_direct(&self, changes: Vec<Change>) -> Result<(), MemoryError> {
        let state = self.lock_open()?;
        write_into(&self.database, &state.scope, changes)
    }
}

fn apply_matching(table: &mut Table, set: &str, changes: &[Change]) {
    for change in changes.iter().filter(|c| c.set() == set) {
        change.apply_to_table(table);
    }
}

fn write_into(database: &MemoryDatabase, scope: &WriteScope, changes: Vec<Change>) -> Result<(), MemoryError> {
    match scope {
        WriteScope::Autocommit => {
            database.apply(&changes);
            Ok(())
        }
        WriteScope::Transaction(overlay) | WriteScope::Enlisted(overlay) => {
            let mut overlay = overlay.lock();
            if overlay.finished {
                return Err(MemoryError::TransactionFinished);
            }
            overlay.changes.extend(changes);
            Ok(())
        }
    }
}

fn key_of<T: Entity>(key: &T::Key) -> Result<String, MemoryError> {
    Ok(serde_json::to_string(key)?)
}

fn decode<T: Entity>(row: &serde_json::Value) -> Result<T, MemoryError> {
    Ok(serde_json::from_value(row.clone())?)
}

fn upsert<T: Entity>(entity: &T) -> Result<Change, MemoryError> {
    Ok(Change::Upsert {
        set: T::SET,
        key: key_of::<T>(&entity.key())?,
        row: serde_json::to_value(entity)?,
    })
}

impl EntityStore for MemorySession {
    type Error = MemoryError;

    fn load_all<T: Entity>(&self) -> Result<Vec<T>, MemoryError> {
        let table = self.view(T::SET)?;
        table.values().map(decode::<T>).collect()
    }

    fn find<T: Entity>(&self, key: &T::Key) -> Result<Option<T>, MemoryError> {
        let key = key_of::<T>(key)?;
        let table = self.view(T::SET)?;
        table.get(&key).map(decode::<T>).transpose()
    }

    fn track_add<T: Entity>(&self, entity: T) -> Result<(), MemoryError> {
        let change = upsert(&entity)?;
        if let Change::Upsert { key, .. } = &change {
            if self.view(T::SET)?.contains_key(key) {
                return Err(MemoryError::DuplicateKey {
                    set: T::SET,
                    key: key.clone(),
                });
            }
        }
        self.track(change)
    }

    fn track_upsert<T: Entity>(&self, entity: T) -> Result<(), MemoryError> {
        self.track(upsert(&entity)?)
    }

    fn track_update<T: Entity>(&self, entity: T) -> Result<(), MemoryError> {
        let change = upsert(&entity)?;
        if let Change::Upsert { key, .. } = &change {
            if !self.view(T::SET)?.contains_key(key) {
                return Err(MemoryError::NotFound {
                    set: T::SET,
                    key: key.clone(),
                });
            }
        }
        self.track(change)
    }

    fn track_remove<T: Entity>(&self, key: &T::Key) -> Result<(), MemoryError> {
        let key = key_of::<T>(key)?;
        if !self.view(T::SET)?.contains_key(&key) {
            return Err(MemoryError::NotFound { set: T::SET, key });
        }
        self.track(Change::Remove { set: T::SET, key })
    }

    fn execute_delete<T: Entity>(&self, filter: &dyn Fn(&T) -> bool) -> Result<usize, MemoryError> {
        let mut changes = Vec::new();
        for (key, row) in self.view(T::SET)?.iter() {
            if filter(&decode::<T>(row)?) {
                changes.push(Change::Remove {
                    set: T::SET,
                    key: key.clone(),
                });
            }
        }
        let count = changes.len();
        self.write_direct(changes)?;
        Ok(count)
    }

    fn execute_update<T: Entity>(
        &self,
        filter: &dyn Fn(&T) -> bool,
        updater: &dyn Fn(T) -> T,
    ) -> Result<usize, MemoryError> {
        let mut changes = Vec::new();
        let mut count = 0;
        for (key, row) in self.view(T::SET)?.iter() {
            let entity = decode::<T>(row)?;
            if !filter(&entity) {
                continue;
            }
            let updated = upsert(&updater(entity))?;
            if let Change::Upsert { key: new_key, .. } = &updated {
                if new_key != key {
                    changes.push(Change::Remove {
                        set: T::SET,
                        key: key.clone(),
                    });
                }
            }
            changes.push(updated);
            count += 1;
        }
        self.write_direct(changes)?;
        Ok(count)
    }
}

#[async_trait]
impl AsyncEntityStore for MemorySession {
    type Error = MemoryError;

    async fn load_all<T: Entity>(&self) -> Result<Vec<T>, MemoryError> {
        EntityStore::load_all::<T>(self)
    }

    async fn find<T: Entity>(&self, key: &T::Key) -> Result<Option<T>, MemoryError> {
        EntityStore::find::<T>(self, key)
    }

    async fn track_add<T: Entity>(&self, entity: T) -> Result<(), MemoryError> {
        EntityStore::track_add(self, entity)
    }

    async fn track_upsert<T: Entity>(&self, entity: T) -> Result<(), MemoryError> {
        EntityStore::track_upsert(self, entity)
    }

    async fn track_update<T: Entity>(&self, entity: T) -> Result<(), MemoryError> {
        EntityStore::track_update(self, entity)
    }

    async fn track_remove<T: Entity>(&self, key: &T::Key) -> Result<(), MemoryError> {
        EntityStore::track_remove::<T>(self, key)
    }

    async fn execute_delete<T: Entity>(
        &self,
        filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
    ) -> Result<usize, MemoryError> {
        EntityStore::execute_delete::<T>(self, filter)
    }

    async fn execute_update<T: Entity>(
        &self,
        filter: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
        updater: &(dyn Fn(T) -> T + Send + Sync),
    ) -> Result<usize, MemoryError> {
        EntityStore::execute_update::<T>(self, filter, updater)
    }
}

impl PersistenceSession for MemorySession {
    type Error = MemoryError;
    type Transaction = MemoryTransaction;

    fn flush(&self) -> Result<usize, MemoryError> {
        self.flush_changes()
    }

    fn begin_transaction(&self, isolation: IsolationLevel) -> Result<MemoryTransaction, MemoryError> {
        self.begin(isolation)
    }

    fn enlist(&self, ambient: &Arc<AmbientTransaction>) -> Result<(), MemoryError> {
        self.join(ambient)
    }

    fn release(&self) {
        self.close();
    }
}

#[async_trait]
impl AsyncPersistenceSession for MemorySession {
    type Error = MemoryError;
    type Transaction = MemoryTransaction;

    async fn flush(&self) -> Result<usize, MemoryError> {
        self.flush_changes()
    }

    async fn begin_transaction(&self, isolation: IsolationLevel) -> Result<MemoryTransaction, MemoryError> {
        self.begin(isolation)
    }

    fn supports_enlistment(&self) -> bool {
        true
    }

    async fn enlist(&self, ambient: &Arc<AmbientTransaction>) -> Result<(), MemoryError> {
        self.join(ambient)
    }

    async fn release(&self) {
        self.close();
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Explicit transaction on a [`MemorySession`].
pub struct MemoryTransaction {
    database: Arc<MemoryDatabase>,
    session: Arc<Mutex<SessionState>>,
    overlay: Arc<Mutex<Overlay>>,
}

impl MemoryTransaction {
    pub fn is_finished(&self) -> bool {
        self.overlay.lock().finished
    }

    fn commit_changes(&mut self) -> Result<(), MemoryError> {
        {
            let mut overlay = self.overlay.lock();
            if overlay.finished {
                return Err(MemoryError::TransactionFinished);
            }
            if self.database.take_fault(Fault::Commit) {
                return Err(MemoryError::Injected(Fault::Commit));
            }
            let changes = mem::take(&mut overlay.changes);
            self.database.apply(&changes);
            overlay.finished = true;
        }
        self.detach();
        Ok(())
    }

    fn rollback_changes(&mut self) -> Result<(), MemoryError> {
        {
            let mut overlay = self.overlay.lock();
            if overlay.finished {
                return Ok(());
            }
            if self.database.take_fault(Fault::Rollback) {
                return Err(MemoryError::Injected(Fault::Rollback));
            }
            overlay.discard();
        }
        self.detach();
        Ok(())
    }

    fn close(&mut self) {
        self.overlay.lock().discard();
        self.detach();
    }

    /// Puts the session back into autocommit if this transaction is its scope.
    fn detach(&self) {
        let mut state = self.session.lock();
        let ours = matches!(&state.scope, WriteScope::Transaction(o) if Arc::ptr_eq(o, &self.overlay));
        if ours {
            state.scope = WriteScope::Autocommit;
        }
    }
}

impl TransactionHandle for MemoryTransaction {
    type Error = MemoryError;

    fn commit(&mut self) -> Result<(), MemoryError> {
        self.commit_changes()
    }

    fn rollback(&mut self) -> Result<(), MemoryError> {
        self.rollback_changes()
    }

    fn release(&mut self) {
        self.close();
    }
}

#[async_trait]
impl AsyncTransactionHandle for MemoryTransaction {
    type Error = MemoryError;

    async fn commit(&mut self) -> Result<(), MemoryError> {
        self.commit_changes()
    }

    async fn rollback(&mut self) -> Result<(), MemoryError> {
        self.rollback_changes()
    }

    async fn release(&mut self) {
        self.close();
    }
}

struct MemoryEnlistment {
    database: Arc<MemoryDatabase>,
    overlay: Arc<Mutex<Overlay>>,
}

impl Enlistment for MemoryEnlistment {
    fn commit(&self) -> Result<(), BoxError> {
        let mut overlay = self.overlay.lock();
        if overlay.finished {
            return Err(Box::new(MemoryError::TransactionFinished));
        }
        if self.database.take_fault(Fault::Commit) {
            overlay.discard();
            return Err(Box::new(MemoryError::Injected(Fault::Commit)));
        }
        let changes = mem::take(&mut overlay.changes);
        self.database.apply(&changes);
        overlay.finished = true;
        Ok(())
    }

    fn rollback(&self) {
        self.overlay.lock().discard();
    }
}
