pub mod cache;
pub use cache::{CacheStats, PlanCache};

pub mod compiler;
pub use compiler::{CompileError, CompilerFactory, CompilerLoader, CompilerParams, QueryCompiler};

pub mod config;
pub use config::EngineConfig;

pub mod engine;
pub use engine::Engine;

pub mod hash;

pub mod interpreter;
pub use interpreter::{QueryEvent, QueryInterpreter};

pub mod parameterize;
pub use parameterize::{parameterize_batch, parameterize_query, Parameterized};

pub mod plan;
pub use plan::{BatchResponse, QueryPlanNode};

pub mod protocol;
pub use protocol::{Action, JsonBatch, JsonQuery, RequestOptions};

pub mod transaction;
pub use transaction::{TransactionInfo, TransactionManager, TransactionOptions};

pub use quarry_core::{driver, Error, Result, Value};
