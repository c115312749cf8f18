use dal_unit_of_work::{DalError, DalResult, TransactionAware};
use parking_lot::RwLock;
use std::sync::Arc;

/// Transaction-aware component recording the callbacks it received
#[derive(Default)]
pub struct RecordingObserver {
    commits: RwLock<usize>,
    rollbacks: RwLock<usize>,
    fail: bool,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An observer whose callbacks record and then fail
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn commits(&self) -> usize {
        *self.commits.read()
    }

    pub fn rollbacks(&self) -> usize {
        *self.rollbacks.read()
    }

    fn outcome(&self) -> DalResult<()> {
        if self.fail {
            return Err(DalError::InvalidArgument("observer rejected the outcome".to_string()));
        }
        Ok(())
    }
}

impl TransactionAware for RecordingObserver {
    fn on_commit(&self) -> DalResult<()> {
        *self.commits.write() += 1;
        self.outcome()
    }

    fn on_rollback(&self) -> DalResult<()> {
        *self.rollbacks.write() += 1;
        self.outcome()
    }
}
