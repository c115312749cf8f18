//! Policies deciding whether a new unit of work is a root or nested, and how
//! a root gets its transaction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::ambient::AmbientTransaction;
use crate::{IsolationLevel, TransactionOption};

/// How a root unit of work obtains its transaction.
#[derive(Clone)]
pub enum TransactionPlan {
    /// Open an explicit transaction on the session.
    Explicit(IsolationLevel),
    /// Enlist the session in an existing ambient transaction.
    Join(Arc<AmbientTransaction>),
    /// Open an owned ambient scope and enlist the session in it.
    OwnScope(IsolationLevel),
    /// No transaction; every flush is durable immediately.
    Autocommit,
}

impl fmt::Debug for TransactionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionPlan::Explicit(level) => f.debug_tuple("Explicit").field(level).finish(),
            TransactionPlan::Join(ambient) => f.debug_tuple("Join").field(&ambient.id()).finish(),
            TransactionPlan::OwnScope(level) => f.debug_tuple("OwnScope").field(level).finish(),
            TransactionPlan::Autocommit => f.write_str("Autocommit"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Placement {
    Root(TransactionPlan),
    Nested,
}

/// What a strategy looks at when placing a synchronous unit of work.
pub struct ContextState {
    pub has_root: bool,
    pub has_session: bool,
    pub ambient: Option<Arc<AmbientTransaction>>,
}

pub trait NestingStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> StrategyKind;

    fn place(
        &self,
        state: &ContextState,
        option: TransactionOption,
        isolation: IsolationLevel,
    ) -> Placement;

    /// Transaction plan for a self-contained asynchronous unit of work. Never
    /// returns [`TransactionPlan::OwnScope`]: async units of work do not
    /// install scopes into the shared context.
    fn plan_async(
        &self,
        ambient: Option<Arc<AmbientTransaction>>,
        option: TransactionOption,
        isolation: IsolationLevel,
        supports_enlistment: bool,
    ) -> TransactionPlan;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    AmbientJoin,
    #[default]
    ExplicitRootTracking,
}

impl StrategyKind {
    pub fn build(self) -> Arc<dyn NestingStrategy> {
        match self {
            StrategyKind::AmbientJoin => Arc::new(AmbientJoinStrategy),
            StrategyKind::ExplicitRootTracking => Arc::new(ExplicitRootTrackingStrategy),
        }
    }
}

/// Nesting follows the root pointer kept in the context.
///
/// Roots with [`TransactionOption::New`] own an explicit transaction, so
/// changes flushed by nested units of work are rolled back with the root.
/// A root that already committed has cleared its session binding; a unit of
/// work created after that opens as a fresh root.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitRootTrackingStrategy;

impl NestingStrategy for ExplicitRootTrackingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ExplicitRootTracking
    }

    fn place(
        &self,
        state: &ContextState,
        option: TransactionOption,
        isolation: IsolationLevel,
    ) -> Placement {
        if state.has_root && state.has_session {
            return Placement::Nested;
        }
        let plan = match (option, &state.ambient) {
            (TransactionOption::New, _) => TransactionPlan::Explicit(isolation),
            (TransactionOption::Current, Some(ambient)) => TransactionPlan::Join(Arc::clone(ambient)),
            (TransactionOption::Current, None) => TransactionPlan::Autocommit,
        };
        Placement::Root(plan)
    }

    fn plan_async(
        &self,
        ambient: Option<Arc<AmbientTransaction>>,
        option: TransactionOption,
        isolation: IsolationLevel,
        supports_enlistment: bool,
    ) -> TransactionPlan {
        match (option, ambient) {
            (TransactionOption::New, _) => TransactionPlan::Explicit(isolation),
            (TransactionOption::Current, Some(ambient)) if supports_enlistment => {
                TransactionPlan::Join(ambient)
            }
            (TransactionOption::Current, Some(_)) => TransactionPlan::Explicit(isolation),
            (TransactionOption::Current, None) => TransactionPlan::Autocommit,
        }
    }
}

/// Nesting follows the ambient transaction: a unit of work is nested when a
/// session is bound and an ambient transaction is current.
///
/// Roots that do not join an existing ambient transaction open their own
/// scope, which later units of work see as ambient.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientJoinStrategy;

impl NestingStrategy for AmbientJoinStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AmbientJoin
    }

    fn place(
        &self,
        state: &ContextState,
        option: TransactionOption,
        isolation: IsolationLevel,
    ) -> Placement {
        if state.has_session && state.ambient.is_some() {
            return Placement::Nested;
        }
        let plan = match (option, &state.ambient) {
            (TransactionOption::Current, Some(ambient)) => TransactionPlan::Join(Arc::clone(ambient)),
            _ => TransactionPlan::OwnScope(isolation),
        };
        Placement::Root(plan)
    }

    fn plan_async(
        &self,
        ambient: Option<Arc<AmbientTransaction>>,
        option: TransactionOption,
        isolation: IsolationLevel,
        supports_enlistment: bool,
    ) -> TransactionPlan {
        match (option, ambient) {
            (TransactionOption::Current, Some(ambient)) if supports_enlistment => {
                TransactionPlan::Join(ambient)
            }
            _ => TransactionPlan::Explicit(isolation),
        }
    }
}
