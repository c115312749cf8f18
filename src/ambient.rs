//! Ambient transactions started outside a unit of work.
//!
//! A [`TransactionScope`] installs an [`AmbientTransaction`] into an
//! [`AmbientContext`]. Sessions created while it is current may join it
//! through [`Enlistment`]s, and their flushed changes are committed or rolled
//! back when the owning scope ends.

use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BoxError;
use crate::{DalError, DalResult, ExceptionTranslator, IsolationLevel};

/// Work a session registers with an ambient transaction.
pub trait Enlistment: Send + Sync {
    fn commit(&self) -> Result<(), BoxError>;

    fn rollback(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientOutcome {
    Active,
    /// A joined scope ended without completing; the owner can only roll back.
    Doomed,
    Committed,
    RolledBack,
}

struct AmbientState {
    outcome: AmbientOutcome,
    enlistments: Vec<Box<dyn Enlistment>>,
}

pub struct AmbientTransaction {
    id: Uuid,
    isolation: IsolationLevel,
    state: Mutex<AmbientState>,
}

impl AmbientTransaction {
    fn new(isolation: IsolationLevel) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            isolation,
            state: Mutex::new(AmbientState {
                outcome: AmbientOutcome::Active,
                enlistments: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn outcome(&self) -> AmbientOutcome {
        self.state.lock().outcome
    }

    pub fn is_active(&self) -> bool {
        self.outcome() == AmbientOutcome::Active
    }

    pub fn enlistment_count(&self) -> usize {
        self.state.lock().enlistments.len()
    }

    pub fn enlist(&self, enlistment: Box<dyn Enlistment>) -> DalResult<()> {
        let mut state = self.state.lock();
        if state.outcome != AmbientOutcome::Active {
            return Err(DalError::TransactionNotActive(self.id));
        }
        state.enlistments.push(enlistment);
        Ok(())
    }

    fn doom(&self) {
        let mut state = self.state.lock();
        if state.outcome == AmbientOutcome::Active {
            state.outcome = AmbientOutcome::Doomed;
        }
    }

    fn commit(&self) -> DalResult<()> {
        let enlistments = {
            let mut state = self.state.lock();
            let outcome = state.outcome;
            match outcome {
                AmbientOutcome::Active => {}
                AmbientOutcome::Doomed => {
                    drop(state);
                    self.rollback();
                    return Err(DalError::TransactionAborted(self.id));
                }
                _ => return Err(DalError::TransactionNotActive(self.id)),
            }
            mem::take(&mut state.enlistments)
        };

        let mut remaining = enlistments.into_iter();
        while let Some(enlistment) = remaining.next() {
            if let Err(err) = enlistment.commit() {
                let err = ExceptionTranslator::wrap(err);
                warn!(ambient_id = %self.id, error = %err, "Ambient transaction enlistment failed to commit, rolling back the rest");
                for rest in remaining {
                    rest.rollback();
                }
                self.state.lock().outcome = AmbientOutcome::RolledBack;
                return Err(err);
            }
        }

        self.state.lock().outcome = AmbientOutcome::Committed;
        debug!(ambient_id = %self.id, "Ambient transaction committed");
        Ok(())
    }

    fn rollback(&self) {
        let enlistments = {
            let mut state = self.state.lock();
            if !matches!(
                state.outcome,
                AmbientOutcome::Active | AmbientOutcome::Doomed
            ) {
                return;
            }
            state.outcome = AmbientOutcome::RolledBack;
            mem::take(&mut state.enlistments)
        };
        for enlistment in enlistments {
            enlistment.rollback();
        }
        debug!(ambient_id = %self.id, "Ambient transaction rolled back");
    }
}

/// Context-scoped slot holding the current ambient transaction.
#[derive(Default)]
pub struct AmbientContext {
    current: Mutex<Option<Arc<AmbientTransaction>>>,
}

impl AmbientContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<Arc<AmbientTransaction>> {
        self.current.lock().clone()
    }

    pub fn has_transaction(&self) -> bool {
        self.current.lock().is_some()
    }

    fn replace(&self, transaction: Option<Arc<AmbientTransaction>>) -> Option<Arc<AmbientTransaction>> {
        mem::replace(&mut *self.current.lock(), transaction)
    }

    /// Puts `previous` back if `ending` is still the current transaction.
    fn restore(&self, ending: &Arc<AmbientTransaction>, previous: Option<Arc<AmbientTransaction>>) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|tx| Arc::ptr_eq(tx, ending)) {
            *current = previous;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    Open,
    Closed,
}

/// Scoped ambient transaction.
///
/// Dropping an owning scope without [`TransactionScope::complete`] rolls the
/// transaction back. Dropping a joined scope without completing it dooms the
/// transaction for its owner.
pub struct TransactionScope {
    context: Arc<AmbientContext>,
    transaction: Arc<AmbientTransaction>,
    previous: Option<Arc<AmbientTransaction>>,
    owner: bool,
    state: ScopeState,
}

impl TransactionScope {
    /// Joins the current ambient transaction, or starts one.
    pub fn required(context: &Arc<AmbientContext>, isolation: IsolationLevel) -> Self {
        match context.current() {
            Some(transaction) if transaction.is_active() => Self {
                context: Arc::clone(context),
                transaction,
                previous: None,
                owner: false,
                state: ScopeState::Open,
            },
            _ => Self::requires_new(context, isolation),
        }
    }

    /// Always starts a new ambient transaction. The previous one becomes
    /// current again when this scope ends.
    pub fn requires_new(context: &Arc<AmbientContext>, isolation: IsolationLevel) -> Self {
        let transaction = AmbientTransaction::new(isolation);
        let previous = context.replace(Some(Arc::clone(&transaction)));
        debug!(ambient_id = %transaction.id(), %isolation, "Ambient transaction started");
        Self {
            context: Arc::clone(context),
            transaction,
            previous,
            owner: true,
            state: ScopeState::Open,
        }
    }

    pub fn transaction(&self) -> &Arc<AmbientTransaction> {
        &self.transaction
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Completes the scope.
    ///
    /// For the owning scope this commits every enlistment in the order they
    /// joined. A joined scope only records its vote.
    pub fn complete(&mut self) -> DalResult<()> {
        if self.state != ScopeState::Open {
            return Err(DalError::TransactionNotActive(self.transaction.id()));
        }
        self.state = ScopeState::Closed;
        if !self.owner {
            return Ok(());
        }
        self.context
            .restore(&self.transaction, self.previous.take());
        self.transaction.commit()
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.state == ScopeState::Open {
            self.state = ScopeState::Closed;
            if self.owner {
                self.context
                    .restore(&self.transaction, self.previous.take());
                self.transaction.rollback();
            } else {
                self.transaction.doom();
            }
        }
    }
}
