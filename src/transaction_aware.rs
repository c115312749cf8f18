use crate::DalResult;

/// Trait for components that need to be notified of unit of work outcomes.
///
/// Components implementing this trait can be registered with a unit of work
/// to receive callbacks once its transaction outcome is final. This allows
/// repositories and caches to update or discard in-memory state.
///
/// Nested units of work never notify: their changes settle with the root.
/// Callback failures are logged and do not change the outcome.
pub trait TransactionAware: Send + Sync {
    /// Called after a successful commit.
    fn on_commit(&self) -> DalResult<()>;

    /// Called after a unit of work was disposed without commit.
    fn on_rollback(&self) -> DalResult<()>;
}

pub(crate) fn notify_commit(observers: &[std::sync::Arc<dyn TransactionAware>]) {
    for observer in observers {
        if let Err(err) = observer.on_commit() {
            tracing::warn!(error = %err, "Transaction observer failed on commit");
        }
    }
}

pub(crate) fn notify_rollback(observers: &[std::sync::Arc<dyn TransactionAware>]) {
    for observer in observers {
        if let Err(err) = observer.on_rollback() {
            tracing::warn!(error = %err, "Transaction observer failed on rollback");
        }
    }
}
