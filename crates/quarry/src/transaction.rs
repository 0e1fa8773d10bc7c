mod manager;
pub use manager::TransactionManager;

use quarry_core::driver::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Identifies an interactive transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub(crate) fn new() -> TransactionId {
        TransactionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle returned when a transaction starts; passed back with every request
/// that should run inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub id: TransactionId,
}

/// Options for starting a transaction.
///
/// Interactive transactions require both `max_wait` and `timeout`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// How long to wait for the database to open the transaction.
    pub max_wait: Option<Duration>,

    /// How long the transaction may stay open once started.
    pub timeout: Option<Duration>,

    pub isolation_level: Option<IsolationLevel>,
}

impl TransactionOptions {
    /// Fills unset fields from `defaults`.
    pub fn or(self, defaults: TransactionOptions) -> TransactionOptions {
        TransactionOptions {
            max_wait: self.max_wait.or(defaults.max_wait),
            timeout: self.timeout.or(defaults.timeout),
            isolation_level: self.isolation_level.or(defaults.isolation_level),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Waiting for the driver to open the transaction.
    Waiting,
    Running,
    Committed,
    RolledBack,
    TimedOut,
}
