mod common;

use dal_unit_of_work::{DalConfig, DalError, IsolationLevel, StrategyKind, TransactionOption};

#[test]
fn test_defaults() {
    let config = DalConfig::default();
    assert_eq!(config.connection.as_str(), "memory://default");
    assert_eq!(config.isolation_level, IsolationLevel::Serializable);
    assert_eq!(config.transaction_option, TransactionOption::New);
    assert_eq!(config.strategy, StrategyKind::ExplicitRootTracking);
}

#[test]
fn test_from_toml() {
    let config = DalConfig::from_toml_str(
        r#"
        connection = "postgres://localhost/app"
        isolation_level = "read_committed"
        transaction_option = "current"
        strategy = "ambient_join"
        "#,
    )
    .expect("Failed to parse config");

    assert_eq!(config.connection.as_str(), "postgres://localhost/app");
    assert_eq!(config.isolation_level, IsolationLevel::ReadCommitted);
    assert_eq!(config.transaction_option, TransactionOption::Current);
    assert_eq!(config.strategy, StrategyKind::AmbientJoin);
}

#[test]
fn test_missing_keys_use_defaults() {
    let config = DalConfig::from_toml_str(r#"isolation_level = "repeatable_read""#)
        .expect("Failed to parse config");
    assert_eq!(
        config,
        DalConfig::default().isolation_level(IsolationLevel::RepeatableRead)
    );
}

#[test]
fn test_invalid_toml_is_config_error() {
    let result = DalConfig::from_toml_str(r#"isolation_level = "chaos""#);
    assert!(matches!(result, Err(DalError::Config(_))));
}

#[test]
fn test_toml_round_trip() {
    let config = DalConfig::with_connection("memory://orders")
        .transaction_option(TransactionOption::Current)
        .strategy(StrategyKind::AmbientJoin);
    let text = config.to_toml_string().expect("Failed to serialize config");
    assert_eq!(DalConfig::from_toml_str(&text).expect("Failed to parse config"), config);
}

#[test]
fn test_factory_applies_config() {
    let config = DalConfig::default()
        .isolation_level(IsolationLevel::ReadCommitted)
        .strategy(StrategyKind::AmbientJoin);
    let (_database, factory) = common::setup_with(config);
    assert_eq!(factory.strategy().kind(), StrategyKind::AmbientJoin);

    let uow = factory.create().expect("Failed to open unit of work");
    assert_eq!(uow.isolation_level(), IsolationLevel::ReadCommitted);
    assert_eq!(uow.scope_option(), TransactionOption::New);
}
