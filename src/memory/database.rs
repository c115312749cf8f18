use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) type Row = serde_json::Value;
pub(crate) type Table = im::OrdMap<String, Row>;
pub(crate) type Tables = im::HashMap<String, Table>;

/// A single row-level change, keyed by entity set and serialized key.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    Upsert {
        set: &'static str,
        key: String,
        row: Row,
    },
    Remove {
        set: &'static str,
        key: String,
    },
}

impl Change {
    pub(crate) fn set(&self) -> &'static str {
        match self {
            Change::Upsert { set, .. } | Change::Remove { set, .. } => *set,
        }
    }

    pub(crate) fn apply_to_table(&self, table: &mut Table) {
        match self {
            Change::Upsert { key, row, .. } => {
                table.insert(key.clone(), row.clone());
            }
            Change::Remove { key, .. } => {
                table.remove(key.as_str());
            }
        }
    }

    fn apply(&self, tables: &mut Tables) {
        let set = self.set();
        match tables.get_mut(set) {
            Some(table) => self.apply_to_table(table),
            None => {
                let mut table = Table::new();
                self.apply_to_table(&mut table);
                tables.insert(set.to_string(), table);
            }
        }
    }
}

/// Operations that can be made to fail once, for exercising error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Connect,
    Flush,
    Commit,
    Rollback,
}

/// Shared committed state of the in-memory backend.
pub struct MemoryDatabase {
    name: String,
    tables: RwLock<Tables>,
    faults: Mutex<HashSet<Fault>>,
    open_sessions: AtomicUsize,
    applied_batches: AtomicU64,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            tables: RwLock::new(Tables::new()),
            faults: Mutex::new(HashSet::new()),
            open_sessions: AtomicUsize::new(0),
            applied_batches: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the next operation of the given kind fail.
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().insert(fault);
    }

    pub(crate) fn take_fault(&self, fault: Fault) -> bool {
        self.faults.lock().remove(&fault)
    }

    /// Sessions created and not yet released.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Number of change batches made durable so far.
    pub fn applied_batches(&self) -> u64 {
        self.applied_batches.load(Ordering::SeqCst)
    }

    /// Committed row count of an entity set.
    pub fn committed_len(&self, set: &str) -> usize {
        self.tables.read().get(set).map_or(0, |table| table.len())
    }

    pub(crate) fn snapshot(&self) -> Tables {
        self.tables.read().clone()
    }

    pub(crate) fn table(&self, set: &str) -> Table {
        self.tables.read().get(set).cloned().unwrap_or_default()
    }

    pub(crate) fn apply(&self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        let mut tables = self.tables.write();
        for change in changes {
            change.apply(&mut tables);
        }
        self.applied_batches.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn session_opened(&self) {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn session_released(&self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}
