//! Ties the compiler, the plan cache, the interpreter and the transaction
//! manager to one driver connection.

mod batch;
mod builder;
mod state;

pub use builder::Builder;

use crate::cache::{BatchPlan, CacheStats, PlanCache, SinglePlan};
use crate::compiler::{self, CompileError, CompilerFactory, CompilerLoader, CompilerParams, PanicSlot, QueryCompiler};
use crate::config::EngineConfig;
use crate::interpreter::QueryInterpreter;
use crate::parameterize::{parameterize_batch, parameterize_query};
use crate::plan::{BatchResponse, QueryPlanNode};
use crate::protocol::{self, JsonBatch, JsonQuery, RequestOptions};
use crate::transaction::{TransactionInfo, TransactionOptions};

use quarry_core::driver::{Driver, Queryable};
use quarry_core::{err, Error, Result, Value};
use serde_json::Map;
use state::{Connected, State};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::OnceCell;
use tracing::Instrument;

/// Executes JSON queries against a database.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

struct Shared {
    config: EngineConfig,
    driver: Arc<dyn Driver>,
    loader: Arc<dyn CompilerLoader>,

    /// Loaded once, kept across reconnects.
    factory: OnceCell<Arc<dyn CompilerFactory>>,

    panics: Arc<PanicSlot>,
    cache: Mutex<PlanCache>,
    interpreter: QueryInterpreter,
    state: Mutex<State>,
}

enum Pending {
    Connect(state::Flight<Arc<Connected>>),
    Disconnect(state::Flight<()>),
}

impl Engine {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Connects eagerly. Requests connect on demand, so calling this is
    /// optional.
    pub async fn start(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    /// Rolls back open transactions, releases the compiler and disposes of
    /// the adapter. The next request reconnects.
    pub async fn stop(&self) -> Result<()> {
        self.disconnect(None).await
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.shared.lock_state(), State::Connected(_))
    }

    pub fn plan_cache_stats(&self) -> CacheStats {
        self.shared.lock_cache().stats()
    }

    /// Runs one query and returns `{ "data": { <action>: <result> } }`.
    pub async fn request(&self, query: &JsonQuery, options: RequestOptions) -> Result<Value> {
        let (connected, plan, bindings) = self.compile_query(query).await?;

        let result = match &options.transaction {
            Some(info) => {
                let transaction = connected.transactions.get_transaction(info, "query")?;
                connected
                    .interpreter
                    .run(&plan, bindings, transaction.as_queryable())
                    .await?
            }
            None => {
                connected
                    .interpreter
                    .run(&plan, bindings, connected.adapter.as_queryable())
                    .await?
            }
        };

        Ok(protocol::response(query.action, result))
    }

    /// Runs a batch and returns one result per entry.
    ///
    /// The outer error fails the whole batch. Entries of a compacted batch
    /// fail individually when a required record is missing.
    pub async fn request_batch(
        &self,
        batch: &JsonBatch,
        options: RequestOptions,
    ) -> Result<Vec<Result<Value>>> {
        let (connected, response, bindings) = self.compile_batch(batch).await?;

        match &*response {
            BatchResponse::Multi { plans } => {
                if plans.len() != batch.batch.len() {
                    return Err(Error::invalid_result(format!(
                        "compiler returned {} plans for a batch of {}",
                        plans.len(),
                        batch.batch.len()
                    )));
                }

                let results = match &options.transaction {
                    Some(info) => {
                        let transaction =
                            connected.transactions.get_transaction(info, "batch query")?;
                        run_sequentially(
                            &connected.interpreter,
                            plans,
                            &bindings,
                            transaction.as_queryable(),
                        )
                        .await?
                    }
                    None => self.run_in_implicit_transaction(&connected, batch, plans, &bindings).await?,
                };

                Ok(batch
                    .batch
                    .iter()
                    .zip(results)
                    .map(|(query, result)| Ok(protocol::response(query.action, result)))
                    .collect())
            }
            BatchResponse::Compacted {
                plan,
                arguments,
                nested_selection,
                keys,
                expect_non_empty,
            } => {
                let rows = match &options.transaction {
                    Some(info) => {
                        let transaction =
                            connected.transactions.get_transaction(info, "batch query")?;
                        connected
                            .interpreter
                            .run(plan, bindings.clone(), transaction.as_queryable())
                            .await?
                    }
                    None => {
                        connected
                            .interpreter
                            .run(plan, bindings.clone(), connected.adapter.as_queryable())
                            .await?
                    }
                };

                let compacted = batch::Compacted {
                    arguments,
                    keys,
                    nested_selection,
                    expect_non_empty: *expect_non_empty,
                };

                let results = compacted.distribute(rows, &bindings)?;
                if results.len() != batch.batch.len() {
                    return Err(Error::invalid_result(format!(
                        "compacted batch produced {} results for a batch of {}",
                        results.len(),
                        batch.batch.len()
                    )));
                }

                Ok(batch
                    .batch
                    .iter()
                    .zip(results)
                    .map(|(query, result)| result.map(|value| protocol::response(query.action, value)))
                    .collect())
            }
        }
    }

    /// Starts an interactive transaction. Unset options fall back to the
    /// configured defaults.
    pub async fn start_transaction(&self, options: TransactionOptions) -> Result<TransactionInfo> {
        let connected = self.connection().await?;
        let options = options.or(self.shared.config.transaction_options.options());

        connected
            .transactions
            .start_transaction(options)
            .instrument(tracing::debug_span!("start_transaction"))
            .await
    }

    pub async fn commit_transaction(&self, info: &TransactionInfo) -> Result<()> {
        self.current()?
            .transactions
            .commit_transaction(&info.id)
            .instrument(tracing::debug_span!("commit_transaction", id = %info.id))
            .await
    }

    pub async fn rollback_transaction(&self, info: &TransactionInfo) -> Result<()> {
        self.current()?
            .transactions
            .rollback_transaction(&info.id)
            .instrument(tracing::debug_span!("rollback_transaction", id = %info.id))
            .await
    }

    async fn run_in_implicit_transaction(
        &self,
        connected: &Connected,
        batch: &JsonBatch,
        plans: &[QueryPlanNode],
        bindings: &Map<String, Value>,
    ) -> Result<Vec<Value>> {
        let mut options = self.shared.config.transaction_options.options();
        if let Some(level) = batch.transaction.as_ref().and_then(|t| t.isolation_level) {
            options.isolation_level = Some(level);
        }

        let transactions = &connected.transactions;
        let info = transactions.start_internal_transaction(options).await?;

        let results = async {
            let transaction = transactions.get_transaction(&info, "batch query")?;
            run_sequentially(&connected.interpreter, plans, bindings, transaction.as_queryable())
                .await
        }
        .await;

        match results {
            Ok(results) => {
                transactions.commit_transaction(&info.id).await?;
                Ok(results)
            }
            Err(err) => {
                if let Err(rollback_err) = transactions.rollback_transaction(&info.id).await {
                    tracing::warn!(%rollback_err, id = %info.id, "failed to roll back batch transaction");
                }
                Err(err)
            }
        }
    }

    /// Compiles a query, going through the plan cache when plan reuse is
    /// enabled. Returns the connection to run the plan on and the bindings
    /// for its placeholders.
    async fn compile_query(
        &self,
        query: &JsonQuery,
    ) -> Result<(Arc<Connected>, Arc<QueryPlanNode>, Map<String, Value>)> {
        if !self.shared.config.plan_cache.reuse_plans {
            let request = serde_json::to_string(query)?;
            let (connected, plan) = self
                .compile(|compiler| compiler.compile(&request))
                .await?;
            return Ok((connected, Arc::new(parse_plan(&plan)?), Map::new()));
        }

        let parameterized = parameterize_query(&serde_json::to_value(query)?);
        let cached = self
            .shared
            .lock_cache()
            .get_single(parameterized.hash, || parameterized.shape_key());

        if let Some(cached) = cached {
            tracing::debug!(hash = parameterized.hash, "plan cache hit");
            let connected = self.connection().await?;
            return Ok((connected, cached.plan, parameterized.bindings()));
        }

        let shape = parameterized.shape_key();
        let (connected, plan) = self.compile(|compiler| compiler.compile(&shape)).await?;
        let plan = Arc::new(parse_plan(&plan)?);

        self.shared.lock_cache().set_single(
            parameterized.hash,
            shape,
            SinglePlan {
                plan: plan.clone(),
                placeholder_paths: parameterized.placeholder_paths(),
            },
        );

        Ok((connected, plan, parameterized.bindings()))
    }

    async fn compile_batch(
        &self,
        batch: &JsonBatch,
    ) -> Result<(Arc<Connected>, Arc<BatchResponse>, Map<String, Value>)> {
        if !self.shared.config.plan_cache.reuse_plans {
            let request = serde_json::to_string(batch)?;
            let (connected, response) = self
                .compile(|compiler| compiler.compile_batch(&request))
                .await?;
            return Ok((connected, Arc::new(parse_batch(&response)?), Map::new()));
        }

        let parameterized = parameterize_batch(&serde_json::to_value(batch)?);
        let cached = self
            .shared
            .lock_cache()
            .get_batch(parameterized.hash, || parameterized.shape_key());

        if let Some(cached) = cached {
            tracing::debug!(hash = parameterized.hash, "batch plan cache hit");
            let connected = self.connection().await?;
            return Ok((connected, cached.response, parameterized.bindings()));
        }

        let shape = parameterized.shape_key();
        let (connected, response) = self
            .compile(|compiler| compiler.compile_batch(&shape))
            .await?;
        let response = Arc::new(parse_batch(&response)?);

        self.shared.lock_cache().set_batch(
            parameterized.hash,
            shape,
            BatchPlan {
                response: response.clone(),
                placeholder_paths: parameterized.placeholder_paths(),
            },
        );

        Ok((connected, response, parameterized.bindings()))
    }

    /// Runs a compiler call on a connected compiler.
    ///
    /// A panic discards the compiler and disconnects the engine. A compiler
    /// that was discarded by a concurrent call is replaced by reconnecting.
    async fn compile<T>(
        &self,
        call: impl Fn(&mut dyn QueryCompiler) -> Result<T, CompileError>,
    ) -> Result<(Arc<Connected>, T)> {
        loop {
            let connected = self.connection().await?;

            match connected.compile(&self.shared.panics, &call) {
                Some(Ok(value)) => return Ok((connected, value)),
                Some(Err(err)) if err.is_panic() => {
                    if let Err(stop_err) = self.disconnect(Some(&connected)).await {
                        tracing::warn!(%stop_err, "failed to disconnect after a compiler panic");
                    }
                    return Err(err);
                }
                Some(Err(err)) => return Err(err),
                None => {
                    self.disconnect(Some(&connected)).await?;
                }
            }
        }
    }

    /// Returns the live connection, connecting first if needed. Concurrent
    /// callers share one connect.
    async fn connection(&self) -> Result<Arc<Connected>> {
        loop {
            let pending = {
                let mut state = self.shared.lock_state();
                match &*state {
                    State::Connected(connected) => return Ok(connected.clone()),
                    State::Connecting(flight) => Pending::Connect(flight.clone()),
                    State::Disconnecting(flight) => Pending::Disconnect(flight.clone()),
                    State::Disconnected => {
                        let (landing, flight) = state::flight();
                        *state = State::Connecting(flight.clone());
                        self.spawn_connect(landing);
                        Pending::Connect(flight)
                    }
                }
            };

            match pending {
                Pending::Connect(flight) => return state::land(flight).await,
                Pending::Disconnect(flight) => {
                    // A failed teardown still leaves the engine disconnected.
                    let _ = state::land(flight).await;
                }
            }
        }
    }

    /// Disconnects. With `expected` set, only that connection is torn down;
    /// a newer one, or one still being established, is left alone.
    async fn disconnect(&self, expected: Option<&Arc<Connected>>) -> Result<()> {
        loop {
            let pending = {
                let mut state = self.shared.lock_state();
                match &*state {
                    State::Disconnected => return Ok(()),
                    State::Connecting(_) if expected.is_some() => return Ok(()),
                    State::Connecting(flight) => Pending::Connect(flight.clone()),
                    State::Disconnecting(flight) => Pending::Disconnect(flight.clone()),
                    State::Connected(connected) => {
                        if expected.is_some_and(|expected| !Arc::ptr_eq(expected, connected)) {
                            return Ok(());
                        }

                        let connected = connected.clone();
                        let (landing, flight) = state::flight();
                        *state = State::Disconnecting(flight.clone());
                        self.spawn_disconnect(connected, landing);
                        Pending::Disconnect(flight)
                    }
                }
            };

            match pending {
                // Let the connect finish, then tear it down.
                Pending::Connect(flight) => {
                    let _ = state::land(flight).await;
                }
                Pending::Disconnect(flight) => return state::land(flight).await,
            }
        }
    }

    fn spawn_connect(&self, landing: state::Landing<Arc<Connected>>) {
        let shared = self.shared.clone();

        tokio::spawn(async move {
            let result = shared
                .setup()
                .instrument(tracing::debug_span!("connect"))
                .await;

            {
                let mut state = shared.lock_state();
                *state = match &result {
                    Ok(connected) => State::Connected(connected.clone()),
                    Err(_) => State::Disconnected,
                };
            }

            match &result {
                Ok(connected) => tracing::debug!(
                    adapter = connected.adapter.adapter_name(),
                    provider = %connected.adapter.provider(),
                    "connected"
                ),
                Err(err) => tracing::warn!(%err, "failed to connect"),
            }

            landing.send_replace(Some(result));
        });
    }

    fn spawn_disconnect(&self, connected: Arc<Connected>, landing: state::Landing<()>) {
        let shared = self.shared.clone();

        tokio::spawn(async move {
            let result = shared
                .teardown(connected)
                .instrument(tracing::debug_span!("disconnect"))
                .await;

            *shared.lock_state() = State::Disconnected;

            match &result {
                Ok(()) => tracing::debug!("disconnected"),
                Err(err) => tracing::warn!(%err, "error while disconnecting"),
            }

            landing.send_replace(Some(result));
        });
    }

    /// Returns the live connection without connecting.
    fn current(&self) -> Result<Arc<Connected>> {
        match &*self.shared.lock_state() {
            State::Connected(connected) => Ok(connected.clone()),
            _ => Err(Error::transaction_not_found()),
        }
    }
}

impl Shared {
    async fn setup(&self) -> Result<Arc<Connected>> {
        let factory = self
            .factory
            .get_or_try_init(|| self.loader.load())
            .await
            .map_err(initialization)?
            .clone();

        let adapter = self.driver.connect().await.map_err(initialization)?;
        let connection_info = adapter.connection_info();

        let params = CompilerParams {
            datamodel: self.config.datamodel.clone(),
            provider: adapter.provider(),
            connection_info: connection_info.clone(),
        };
        let reporter = self.panics.reporter();

        let compiler = match compiler::guarded(&self.panics, || factory.create(params, reporter)) {
            Ok(compiler) => compiler,
            Err(err) => {
                if let Err(dispose_err) = adapter.dispose().await {
                    tracing::warn!(%dispose_err, "failed to dispose adapter after a failed connect");
                }
                return Err(initialization(err));
            }
        };

        let interpreter = self
            .interpreter
            .clone()
            .max_bind_values(connection_info.max_bind_values);

        Ok(Arc::new(Connected::new(adapter, compiler, interpreter)))
    }

    async fn teardown(&self, connected: Arc<Connected>) -> Result<()> {
        connected.transactions.cancel_all_transactions().await;

        if let Some(compiler) = connected.take_compiler() {
            let freed = compiler::guarded(&self.panics, || {
                compiler.free();
                Ok(())
            });
            if let Err(err) = freed {
                tracing::warn!(%err, "failed to free query compiler");
            }
        }

        connected
            .adapter
            .dispose()
            .await
            .map_err(|err| err.context(err!("failed to dispose of the driver adapter")))
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cache(&self) -> MutexGuard<'_, PlanCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.shared.lock_state().name())
            .field("config", &self.shared.config)
            .field("driver", &self.shared.driver)
            .finish()
    }
}

async fn run_sequentially(
    interpreter: &QueryInterpreter,
    plans: &[QueryPlanNode],
    bindings: &Map<String, Value>,
    queryable: &dyn Queryable,
) -> Result<Vec<Value>> {
    let mut results = Vec::with_capacity(plans.len());
    for plan in plans {
        results.push(interpreter.run(plan, bindings.clone(), queryable).await?);
    }
    Ok(results)
}

/// Setup failures are reported as initialization errors. Panics keep their
/// kind.
fn initialization(err: Error) -> Error {
    if err.is_initialization() || err.is_panic() {
        err
    } else {
        Error::initialization(err.to_string(), err.code())
    }
}

fn parse_plan(plan: &str) -> Result<QueryPlanNode> {
    tracing::debug!(%plan, "compiled query plan");
    serde_json::from_str(plan)
        .map_err(|err| Error::invalid_result(format!("compiler returned an invalid plan: {err}")))
}

fn parse_batch(response: &str) -> Result<BatchResponse> {
    tracing::debug!(%response, "compiled batch plan");
    serde_json::from_str(response).map_err(|err| {
        Error::invalid_result(format!("compiler returned an invalid batch plan: {err}"))
    })
}
