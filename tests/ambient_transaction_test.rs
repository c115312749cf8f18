mod common;

use dal_unit_of_work::memory::{Fault, MemoryError};
use dal_unit_of_work::{
    AmbientOutcome, DalConfig, DalError, IsolationLevel, StrategyKind, TransactionOption,
    TransactionScope,
};
use std::sync::Arc;

use common::{committed_blogs, persistence_source, repository, setup, setup_with, Blog};

#[test]
fn test_current_option_joins_external_transaction() {
    // Setup
    let (database, factory) = setup();
    let blogs = repository::<Blog>(&factory);
    let mut scope = TransactionScope::requires_new(factory.context().ambient(), IsolationLevel::Serializable);

    let mut uow = factory
        .create_with(IsolationLevel::Serializable, TransactionOption::Current)
        .expect("Failed to open unit of work");
    assert!(!uow.owns_transaction());
    assert_eq!(scope.transaction().enlistment_count(), 1);

    blogs.add(Blog::new("joined", 1)).expect("Failed to add blog");
    uow.commit().expect("Failed to commit unit of work");
    drop(uow);

    // Nothing is durable until the external transaction completes
    assert_eq!(database.committed_len("blogs"), 0);

    scope.complete().expect("Failed to complete scope");
    assert_eq!(scope.transaction().outcome(), AmbientOutcome::Committed);
    assert_eq!(database.committed_len("blogs"), 1);
    assert!(!factory.context().ambient().has_transaction());
}

#[test]
fn test_uncompleted_external_transaction_discards_changes() {
    let (database, factory) = setup();
    let blogs = repository::<Blog>(&factory);
    let scope = TransactionScope::requires_new(factory.context().ambient(), IsolationLevel::ReadCommitted);
    let ambient = Arc::clone(scope.transaction());

    let mut uow = factory
        .create_with(IsolationLevel::ReadCommitted, TransactionOption::Current)
        .expect("Failed to open unit of work");
    blogs.add(Blog::new("lost", 1)).expect("Failed to add blog");
    uow.commit().expect("Failed to commit unit of work");
    drop(uow);

    drop(scope);
    assert_eq!(ambient.outcome(), AmbientOutcome::RolledBack);
    assert_eq!(database.committed_len("blogs"), 0);
    assert_eq!(committed_blogs(&factory), 0);
}

#[test]
fn test_new_option_ignores_external_transaction() {
    let (database, factory) = setup();
    let blogs = repository::<Blog>(&factory);
    let scope = TransactionScope::requires_new(factory.context().ambient(), IsolationLevel::Serializable);

    let mut uow = factory.create().expect("Failed to open unit of work");
    assert!(uow.owns_transaction());
    blogs.add(Blog::new("own", 1)).expect("Failed to add blog");
    uow.commit().expect("Failed to commit unit of work");
    drop(uow);

    assert_eq!(scope.transaction().enlistment_count(), 0);
    drop(scope);
    assert_eq!(database.committed_len("blogs"), 1);
}

#[test]
fn test_joined_scope_dooms_owner() {
    let (database, factory) = setup();
    let blogs = repository::<Blog>(&factory);
    let context = factory.context();

    let mut outer = TransactionScope::requires_new(context.ambient(), IsolationLevel::Serializable);
    let inner = TransactionScope::required(context.ambient(), IsolationLevel::Serializable);
    assert!(outer.is_owner());
    assert!(!inner.is_owner());

    let mut uow = factory
        .create_with(IsolationLevel::Serializable, TransactionOption::Current)
        .expect("Failed to open unit of work");
    blogs.add(Blog::new("doomed", 1)).expect("Failed to add blog");
    uow.commit().expect("Failed to commit unit of work");
    drop(uow);

    // Inner scope ends without completing
    drop(inner);
    assert_eq!(outer.transaction().outcome(), AmbientOutcome::Doomed);

    let err = outer.complete().expect_err("Doomed transaction should not commit");
    assert!(matches!(err, DalError::TransactionAborted(id) if id == outer.transaction().id()));
    assert_eq!(database.committed_len("blogs"), 0);
}

#[test]
fn test_requires_new_restores_previous_transaction() {
    let (_database, factory) = setup();
    let ambient = factory.context().ambient();

    let mut outer = TransactionScope::requires_new(ambient, IsolationLevel::Serializable);
    let outer_id = outer.transaction().id();
    {
        let mut inner = TransactionScope::requires_new(ambient, IsolationLevel::ReadCommitted);
        assert_ne!(inner.transaction().id(), outer_id);
        let current = ambient.current().expect("Inner transaction should be current");
        assert_eq!(current.id(), inner.transaction().id());
        inner.complete().expect("Failed to complete inner scope");
    }

    let current = ambient.current().expect("Outer transaction should be current again");
    assert_eq!(current.id(), outer_id);
    outer.complete().expect("Failed to complete outer scope");
    assert!(ambient.current().is_none());
    assert!(matches!(outer.complete(), Err(DalError::TransactionNotActive(_))));
}

#[test]
fn test_enlistment_commit_failure_rolls_back_the_rest() {
    let (database, factory) = setup();
    let blogs = repository::<Blog>(&factory);
    let mut scope = TransactionScope::requires_new(factory.context().ambient(), IsolationLevel::Serializable);

    for name in ["first", "second"] {
        let mut uow = factory
            .create_with(IsolationLevel::Serializable, TransactionOption::Current)
            .expect("Failed to open unit of work");
        blogs.add(Blog::new(name, 1)).expect("Failed to add blog");
        uow.commit().expect("Failed to commit unit of work");
    }
    assert_eq!(scope.transaction().enlistment_count(), 2);

    database.inject(Fault::Commit);
    let err = scope.complete().expect_err("Enlistment failure should surface");
    assert!(matches!(
        persistence_source::<MemoryError>(&err),
        Some(MemoryError::Injected(Fault::Commit))
    ));
    assert_eq!(scope.transaction().outcome(), AmbientOutcome::RolledBack);
    assert_eq!(database.committed_len("blogs"), 0);
}

#[test]
fn test_ambient_join_strategy_root_owns_scope() {
    // Setup
    let (database, factory) = setup_with(DalConfig::default().strategy(StrategyKind::AmbientJoin));
    let blogs = repository::<Blog>(&factory);
    let ambient = factory.context().ambient();

    let mut root = factory.create().expect("Failed to open root");
    assert!(root.owns_transaction());
    assert!(ambient.has_transaction());

    {
        let mut nested = factory.create().expect("Failed to open nested");
        assert!(nested.is_nested());
        blogs.add(Blog::new("scoped", 1)).expect("Failed to add blog");
        nested.commit().expect("Failed to commit nested");
    }
    assert_eq!(database.committed_len("blogs"), 0);

    root.commit().expect("Failed to commit root");
    assert!(!ambient.has_transaction());
    drop(root);

    assert_eq!(database.committed_len("blogs"), 1);
}

#[test]
fn test_ambient_join_strategy_nested_without_root_commit() {
    let (database, factory) = setup_with(DalConfig::default().strategy(StrategyKind::AmbientJoin));
    let blogs = repository::<Blog>(&factory);

    let root = factory.create().expect("Failed to open root");
    let mut nested = factory.create().expect("Failed to open nested");
    blogs.add(Blog::new("a", 1)).expect("Failed to add blog");
    nested.commit().expect("Failed to commit nested");
    drop(nested);

    // Dispose root without commit
    drop(root);

    assert!(!factory.context().ambient().has_transaction());
    assert_eq!(database.committed_len("blogs"), 0);
    assert_eq!(database.open_sessions(), 0);
}

#[test]
fn test_ambient_join_strategy_joins_external_transaction() {
    let (database, factory) = setup_with(DalConfig::default().strategy(StrategyKind::AmbientJoin));
    let blogs = repository::<Blog>(&factory);
    let mut scope = TransactionScope::requires_new(factory.context().ambient(), IsolationLevel::Serializable);

    let mut uow = factory
        .create_with(IsolationLevel::Serializable, TransactionOption::Current)
        .expect("Failed to open unit of work");
    assert!(!uow.is_nested());
    assert!(!uow.owns_transaction());
    blogs.add(Blog::new("joined", 1)).expect("Failed to add blog");
    uow.commit().expect("Failed to commit unit of work");
    drop(uow);

    assert_eq!(database.committed_len("blogs"), 0);
    scope.complete().expect("Failed to complete scope");
    assert_eq!(database.committed_len("blogs"), 1);
}
