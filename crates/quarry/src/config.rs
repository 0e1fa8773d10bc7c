//! Engine configuration.
//!
//! Durations are given in milliseconds so the configuration can be read from
//! the same JSON documents callers already produce:
//!
//! ```json
//! {
//!   "datamodel": "...",
//!   "transactionOptions": { "maxWait": 2000, "timeout": 5000 },
//!   "planCache": { "reusePlans": true }
//! }
//! ```

use crate::cache::DEFAULT_CAPACITY;
use crate::transaction::TransactionOptions;

use quarry_core::driver::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Schema forwarded verbatim to the query compiler.
    pub datamodel: String,

    pub transaction_options: TransactionDefaults,

    pub plan_cache: PlanCacheConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> quarry_core::Result<EngineConfig> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Defaults applied to interactive transactions when the caller leaves an
/// option unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionDefaults {
    pub max_wait: u64,

    pub timeout: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<IsolationLevel>,
}

impl Default for TransactionDefaults {
    fn default() -> Self {
        TransactionDefaults {
            max_wait: 2000,
            timeout: 5000,
            isolation_level: None,
        }
    }
}

impl TransactionDefaults {
    pub fn options(&self) -> TransactionOptions {
        TransactionOptions {
            max_wait: Some(Duration::from_millis(self.max_wait)),
            timeout: Some(Duration::from_millis(self.timeout)),
            isolation_level: self.isolation_level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanCacheConfig {
    pub single_capacity: usize,

    pub batch_capacity: usize,

    /// Compile parameterized shapes and replay cached plans for queries that
    /// only differ in their values. When off, every request compiles the
    /// literal query.
    pub reuse_plans: bool,
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        PlanCacheConfig {
            single_capacity: DEFAULT_CAPACITY,
            batch_capacity: DEFAULT_CAPACITY,
            reuse_plans: false,
        }
    }
}
