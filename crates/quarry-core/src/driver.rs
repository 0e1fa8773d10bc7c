mod provider;
pub use provider::{ConnectionInfo, Provider};

mod query;
pub use query::{ArgType, SqlQuery};

mod result_set;
pub use result_set::{ColumnType, ResultSet};

mod transaction;
pub use transaction::IsolationLevel;

use crate::{async_trait, Result};

use std::{fmt::Debug, sync::Arc};

/// Opens adapters. One adapter is opened per engine connection.
#[async_trait]
pub trait Driver: Debug + Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn Adapter>>;
}

/// Anything raw SQL can be sent to: the adapter itself, a transaction
/// context, or an open transaction.
#[async_trait]
pub trait Queryable: Debug + Send + Sync {
    /// The database flavor on the other end of the connection.
    fn provider(&self) -> Provider;

    /// Name reported in diagnostics, e.g. `"quarry-driver-pg"`.
    fn adapter_name(&self) -> &str;

    /// Runs a statement returning rows.
    async fn query_raw(&self, query: &SqlQuery) -> Result<ResultSet>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute_raw(&self, query: &SqlQuery) -> Result<u64>;
}

#[async_trait]
pub trait Adapter: Queryable {
    /// Reserves a connection on which a transaction can be started.
    async fn transaction_context(&self) -> Result<Box<dyn TransactionContext>>;

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo::default()
    }

    /// Releases every connection held by the adapter.
    async fn dispose(&self) -> Result<()>;

    fn as_queryable(&self) -> &dyn Queryable;
}

#[async_trait]
pub trait TransactionContext: Queryable {
    /// Opens the physical transaction. Consumes the context: a context is
    /// used for at most one transaction.
    async fn start_transaction(self: Box<Self>) -> Result<Box<dyn Transaction>>;
}

#[async_trait]
pub trait Transaction: Queryable {
    /// When `true` the driver manages `BEGIN`/`COMMIT`/`ROLLBACK` itself and
    /// the engine must not send them as statements.
    fn use_phantom_query(&self) -> bool {
        false
    }

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    fn as_queryable(&self) -> &dyn Queryable;
}
