//! Data access configuration

use serde::{Deserialize, Serialize};

use crate::strategy::StrategyKind;
use crate::{ConnectionDescriptor, DalError, DalResult, IsolationLevel, TransactionOption};

/// Defaults the factory applies to every unit of work it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DalConfig {
    /// Connection descriptor handed to the session factory
    pub connection: ConnectionDescriptor,
    /// Isolation level used when none is given
    pub isolation_level: IsolationLevel,
    /// Transaction option used when none is given
    pub transaction_option: TransactionOption,
    /// Nesting strategy
    pub strategy: StrategyKind,
}

impl Default for DalConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionDescriptor::default(),
            isolation_level: IsolationLevel::Serializable,
            transaction_option: TransactionOption::New,
            strategy: StrategyKind::ExplicitRootTracking,
        }
    }
}

impl DalConfig {
    /// Parses a config from TOML. Missing keys fall back to the defaults.
    pub fn from_toml_str(source: &str) -> DalResult<Self> {
        toml::from_str(source).map_err(|err| DalError::Config(err.to_string()))
    }

    pub fn to_toml_string(&self) -> DalResult<String> {
        toml::to_string(self).map_err(|err| DalError::Config(err.to_string()))
    }

    /// Create a config for the given connection descriptor
    pub fn with_connection(connection: impl Into<String>) -> Self {
        Self {
            connection: ConnectionDescriptor::new(connection),
            ..Default::default()
        }
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn transaction_option(mut self, option: TransactionOption) -> Self {
        self.transaction_option = option;
        self
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }
}
