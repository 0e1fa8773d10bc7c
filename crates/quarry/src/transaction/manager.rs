use super::{TransactionId, TransactionInfo, TransactionOptions, TransactionStatus};

use quarry_core::driver::{Adapter, IsolationLevel, Provider, SqlQuery, Transaction};
use quarry_core::{Error, Result};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};

/// Closed transactions remembered for error reporting.
const MAX_CLOSED_TRANSACTIONS: usize = 100;

/// Tracks interactive transactions opened on one adapter.
///
/// Each live transaction has at most one timer: the start timer while
/// `Waiting` (bounded by `max_wait`) and the execution timer while
/// `Running` (bounded by `timeout`). A fired timer closes the transaction as
/// `TimedOut`.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    adapter: Arc<dyn Adapter>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    live: HashMap<TransactionId, Live>,
    closed: VecDeque<Closed>,
}

#[derive(Debug)]
struct Live {
    status: TransactionStatus,
    timeout: Option<Duration>,
    started_at: Instant,
    timer: Option<JoinHandle<()>>,
    transaction: Option<Arc<dyn Transaction>>,
}

#[derive(Debug)]
struct Closed {
    id: TransactionId,
    status: TransactionStatus,
    timeout: Option<Duration>,
    started_at: Instant,
}

impl State {
    /// Moves a live transaction into the closed ring.
    fn close(&mut self, id: &TransactionId, status: TransactionStatus) -> Option<Live> {
        let live = self.live.remove(id)?;

        self.closed.push_back(Closed {
            id: id.clone(),
            status,
            timeout: live.timeout,
            started_at: live.started_at,
        });
        if self.closed.len() > MAX_CLOSED_TRANSACTIONS {
            self.closed.pop_front();
        }

        Some(live)
    }

    fn closed_error(&self, id: &TransactionId, operation: &str) -> Error {
        let Some(closed) = self.closed.iter().rev().find(|closed| &closed.id == id) else {
            return Error::transaction_not_found();
        };

        match closed.status {
            TransactionStatus::Committed => Error::transaction_closed(operation),
            TransactionStatus::RolledBack => Error::transaction_rolled_back(operation),
            TransactionStatus::TimedOut => Error::transaction_execution_timeout(
                operation,
                closed.timeout.unwrap_or_default(),
                closed.started_at.elapsed(),
            ),
            status => Error::transaction_internal(format!(
                "closed transaction {id} has status {status:?}"
            )),
        }
    }
}

impl TransactionManager {
    pub fn new(adapter: Arc<dyn Adapter>) -> TransactionManager {
        TransactionManager {
            shared: Arc::new(Shared {
                adapter,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Starts an interactive transaction. `max_wait` and `timeout` are
    /// required.
    pub async fn start_transaction(&self, options: TransactionOptions) -> Result<TransactionInfo> {
        if options.timeout.map_or(true, |timeout| timeout.is_zero()) {
            return Err(Error::transaction_manager("timeout is required"));
        }
        if options.max_wait.map_or(true, |max_wait| max_wait.is_zero()) {
            return Err(Error::transaction_manager("maxWait is required"));
        }

        self.start(options).await
    }

    /// Starts a transaction on behalf of the engine, e.g. for a batch. Timers
    /// are only armed for the durations that are set.
    pub async fn start_internal_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<TransactionInfo> {
        self.start(options).await
    }

    pub async fn commit_transaction(&self, id: &TransactionId) -> Result<()> {
        let transaction = self.finish(id, TransactionStatus::Committed, "commit")?;
        tracing::debug!(%id, "committing transaction");
        match transaction {
            Some(transaction) => commit(&*transaction).await,
            None => Ok(()),
        }
    }

    pub async fn rollback_transaction(&self, id: &TransactionId) -> Result<()> {
        let transaction = self.finish(id, TransactionStatus::RolledBack, "rollback")?;
        tracing::debug!(%id, "rolling back transaction");
        match transaction {
            Some(transaction) => rollback(&*transaction).await,
            None => Ok(()),
        }
    }

    /// Returns the driver transaction for a running transaction. `operation`
    /// names what the caller is about to do, for error messages.
    pub fn get_transaction(
        &self,
        info: &TransactionInfo,
        operation: &str,
    ) -> Result<Arc<dyn Transaction>> {
        let state = self.lock();

        match state.live.get(&info.id) {
            Some(Live {
                status: TransactionStatus::Running,
                transaction: Some(transaction),
                ..
            }) => Ok(transaction.clone()),
            Some(_) => Err(Error::transaction_not_found()),
            None => Err(state.closed_error(&info.id, operation)),
        }
    }

    pub fn status(&self, id: &TransactionId) -> Option<TransactionStatus> {
        let state = self.lock();
        state.live.get(id).map(|live| live.status).or_else(|| {
            state
                .closed
                .iter()
                .rev()
                .find(|closed| &closed.id == id)
                .map(|closed| closed.status)
        })
    }

    /// Rolls back every live transaction. Used when the engine disconnects.
    pub async fn cancel_all_transactions(&self) {
        let transactions: Vec<_> = {
            let mut state = self.lock();
            let ids: Vec<_> = state.live.keys().cloned().collect();
            ids.iter()
                .filter_map(|id| state.close(id, TransactionStatus::RolledBack))
                .filter_map(|live| {
                    if let Some(timer) = live.timer {
                        timer.abort();
                    }
                    live.transaction
                })
                .collect()
        };

        for transaction in transactions {
            if let Err(err) = rollback(&*transaction).await {
                tracing::warn!(%err, "failed to roll back transaction while disconnecting");
            }
        }
    }

    async fn start(&self, options: TransactionOptions) -> Result<TransactionInfo> {
        let provider = self.shared.adapter.provider();
        if let Some(level) = options.isolation_level {
            if !level.is_supported_by(provider) {
                return Err(Error::invalid_isolation_level(level, provider));
            }
        }

        let id = TransactionId::new();
        {
            let timer = options
                .max_wait
                .map(|max_wait| self.spawn_timer(id.clone(), max_wait));
            self.lock().live.insert(
                id.clone(),
                Live {
                    status: TransactionStatus::Waiting,
                    timeout: options.timeout,
                    started_at: Instant::now(),
                    timer,
                    transaction: None,
                },
            );
        }
        tracing::debug!(%id, ?options, "starting transaction");

        let opened = self.open(provider, options.isolation_level).await;

        let mut state = self.lock();
        let waiting = matches!(
            state.live.get(&id),
            Some(live) if live.status == TransactionStatus::Waiting
        );

        if !waiting {
            // The start timer fired first. The late transaction never sees a
            // COMMIT or ROLLBACK statement, but its connection is released.
            drop(state);
            if let Ok(transaction) = opened {
                tracing::warn!(%id, "transaction started after maxWait elapsed; discarding it");
                if let Err(err) = transaction.rollback().await {
                    tracing::warn!(%id, %err, "failed to release late transaction");
                }
            }
            return Err(Error::transaction_start_timeout(
                options.max_wait.unwrap_or_default(),
            ));
        }

        let Some(live) = state.live.get_mut(&id) else {
            return Err(Error::transaction_internal(format!("transaction {id} vanished")));
        };

        if let Some(timer) = live.timer.take() {
            timer.abort();
        }

        match opened {
            Ok(transaction) => {
                live.status = TransactionStatus::Running;
                live.transaction = Some(transaction);
                live.timer = options
                    .timeout
                    .map(|timeout| self.spawn_timer(id.clone(), timeout));
                tracing::debug!(%id, "transaction running");
                Ok(TransactionInfo { id })
            }
            Err(err) => {
                state.live.remove(&id);
                Err(err)
            }
        }
    }

    /// Opens the physical transaction and sends the dialect's begin and
    /// isolation statements.
    async fn open(
        &self,
        provider: Provider,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<Arc<dyn Transaction>> {
        let context = self.shared.adapter.transaction_context().await?;

        if let Some(level) = isolation_level {
            if provider.sets_isolation_before_begin() {
                context.execute_raw(&isolation_statement(level)).await?;
            }
        }

        let transaction: Arc<dyn Transaction> = Arc::from(context.start_transaction().await?);

        let statements = async {
            if !transaction.use_phantom_query() {
                transaction
                    .execute_raw(&SqlQuery::raw(provider.begin_statement()))
                    .await?;
            }

            // SQLite has a single isolation level, which is the default.
            if let Some(level) = isolation_level {
                if !provider.sets_isolation_before_begin() && provider != Provider::Sqlite {
                    transaction.execute_raw(&isolation_statement(level)).await?;
                }
            }

            Ok::<_, Error>(())
        };

        if let Err(err) = statements.await {
            if let Err(rollback_err) = transaction.rollback().await {
                tracing::warn!(%rollback_err, "failed to release transaction after a failed begin");
            }
            return Err(err);
        }

        Ok(transaction)
    }

    /// Closes a running transaction on behalf of the caller and returns the
    /// driver transaction to finish.
    fn finish(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
        operation: &str,
    ) -> Result<Option<Arc<dyn Transaction>>> {
        let mut state = self.lock();

        match state.live.get(id) {
            Some(live) if live.status == TransactionStatus::Running => {}
            Some(_) => return Err(Error::transaction_not_found()),
            None => return Err(state.closed_error(id, operation)),
        }

        let live = state
            .close(id, status)
            .ok_or_else(|| Error::transaction_internal(format!("transaction {id} vanished")))?;
        drop(state);

        if let Some(timer) = live.timer {
            timer.abort();
        }
        Ok(live.transaction)
    }

    /// Called by a fired timer.
    async fn expire(&self, id: &TransactionId) {
        let live = {
            let mut state = self.lock();
            if !state.live.contains_key(id) {
                return;
            }
            state.close(id, TransactionStatus::TimedOut)
        };

        // The timer handle belongs to the task running this; it is dropped,
        // not aborted.
        let Some(transaction) = live.and_then(|live| live.transaction) else {
            tracing::debug!(%id, "transaction timed out while starting");
            return;
        };

        tracing::debug!(%id, "transaction timed out; rolling back");
        if let Err(err) = rollback(&*transaction).await {
            tracing::warn!(%id, %err, "failed to roll back timed out transaction");
        }
    }

    fn spawn_timer(&self, id: TransactionId, after: Duration) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(shared) = shared.upgrade() {
                TransactionManager { shared }.expire(&id).await;
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn isolation_statement(level: IsolationLevel) -> SqlQuery {
    SqlQuery::raw(format!(
        "SET TRANSACTION ISOLATION LEVEL {}",
        level.sql_name()
    ))
}

async fn commit(transaction: &dyn Transaction) -> Result<()> {
    if !transaction.use_phantom_query() {
        if let Err(err) = transaction.execute_raw(&SqlQuery::raw("COMMIT")).await {
            if let Err(rollback_err) = transaction.rollback().await {
                tracing::warn!(%rollback_err, "failed to roll back after a failed COMMIT");
            }
            return Err(err.into_user_facing());
        }
    }

    transaction.commit().await
}

async fn rollback(transaction: &dyn Transaction) -> Result<()> {
    let statement = if transaction.use_phantom_query() {
        Ok(0)
    } else {
        transaction.execute_raw(&SqlQuery::raw("ROLLBACK")).await
    };
    let released = transaction.rollback().await;

    statement?;
    released
}
