use super::{Engine, Shared};
use crate::cache::PlanCache;
use crate::compiler::{CompilerLoader, PanicSlot};
use crate::config::{EngineConfig, TransactionDefaults};
use crate::interpreter::{QueryEvent, QueryEventListener, QueryInterpreter};

use quarry_core::driver::{Driver, IsolationLevel};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::OnceCell;

#[derive(Default)]
pub struct Builder {
    config: EngineConfig,

    on_query: Option<QueryEventListener>,
}

impl Builder {
    /// Replaces the whole configuration.
    pub fn config(&mut self, config: EngineConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn datamodel(&mut self, datamodel: impl Into<String>) -> &mut Self {
        self.config.datamodel = datamodel.into();
        self
    }

    pub fn transaction_defaults(&mut self, defaults: TransactionDefaults) -> &mut Self {
        self.config.transaction_options = defaults;
        self
    }

    /// Default time to wait for a transaction to start.
    pub fn max_wait(&mut self, max_wait: Duration) -> &mut Self {
        self.config.transaction_options.max_wait = millis(max_wait);
        self
    }

    /// Default time a transaction may stay open.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.transaction_options.timeout = millis(timeout);
        self
    }

    pub fn isolation_level(&mut self, isolation_level: IsolationLevel) -> &mut Self {
        self.config.transaction_options.isolation_level = Some(isolation_level);
        self
    }

    pub fn plan_cache_capacity(&mut self, single: usize, batch: usize) -> &mut Self {
        self.config.plan_cache.single_capacity = single;
        self.config.plan_cache.batch_capacity = batch;
        self
    }

    pub fn reuse_plans(&mut self, reuse: bool) -> &mut Self {
        self.config.plan_cache.reuse_plans = reuse;
        self
    }

    /// Called after every statement sent to the database.
    pub fn on_query(&mut self, listener: impl Fn(&QueryEvent) + Send + Sync + 'static) -> &mut Self {
        self.on_query = Some(Arc::new(listener));
        self
    }

    /// Builds the engine. Nothing is loaded or connected until the first
    /// request or an explicit [`Engine::start`].
    pub fn build(&mut self, driver: impl Driver, loader: impl CompilerLoader) -> Engine {
        let mut interpreter = QueryInterpreter::new();
        if let Some(listener) = &self.on_query {
            interpreter = interpreter.on_query(listener.clone());
        }

        let cache = PlanCache::new(
            self.config.plan_cache.single_capacity,
            self.config.plan_cache.batch_capacity,
        );

        Engine {
            shared: Arc::new(Shared {
                config: self.config.clone(),
                driver: Arc::new(driver),
                loader: Arc::new(loader),
                factory: OnceCell::new(),
                panics: PanicSlot::new(),
                cache: Mutex::new(cache),
                interpreter,
                state: Mutex::new(super::State::Disconnected),
            }),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
