use crate::compiler::{self, CompileError, PanicSlot, QueryCompiler};
use crate::interpreter::QueryInterpreter;
use crate::transaction::TransactionManager;

use quarry_core::driver::Adapter;
use quarry_core::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Connection state of an engine.
pub(super) enum State {
    Disconnected,
    Connecting(Flight<Arc<Connected>>),
    Connected(Arc<Connected>),
    Disconnecting(Flight<()>),
}

impl State {
    pub(super) fn name(&self) -> &'static str {
        match self {
            State::Disconnected => "disconnected",
            State::Connecting(_) => "connecting",
            State::Connected(_) => "connected",
            State::Disconnecting(_) => "disconnecting",
        }
    }
}

/// Result of an in-flight connect or disconnect, shared by every caller that
/// observed the transition.
pub(super) type Flight<T> = watch::Receiver<Option<Result<T>>>;

pub(super) type Landing<T> = watch::Sender<Option<Result<T>>>;

pub(super) fn flight<T>() -> (Landing<T>, Flight<T>) {
    watch::channel(None)
}

/// Waits for the flight to finish.
pub(super) async fn land<T: Clone>(mut flight: Flight<T>) -> Result<T> {
    let landed = flight
        .wait_for(Option::is_some)
        .await
        .map_err(|_| Error::initialization("connection task ended without a result", None))?;

    match &*landed {
        Some(result) => result.clone(),
        None => Err(Error::initialization(
            "connection task ended without a result",
            None,
        )),
    }
}

/// Resources owned by a live connection. Released together on disconnect.
pub(super) struct Connected {
    pub(super) adapter: Arc<dyn Adapter>,
    pub(super) transactions: TransactionManager,
    pub(super) interpreter: QueryInterpreter,

    /// `None` once the compiler panicked.
    compiler: Mutex<Option<Box<dyn QueryCompiler>>>,
}

impl Connected {
    pub(super) fn new(
        adapter: Arc<dyn Adapter>,
        compiler: Box<dyn QueryCompiler>,
        interpreter: QueryInterpreter,
    ) -> Connected {
        Connected {
            transactions: TransactionManager::new(adapter.clone()),
            adapter,
            interpreter,
            compiler: Mutex::new(Some(compiler)),
        }
    }

    /// Runs `call` against the compiler. Returns `None` when the compiler was
    /// already discarded. A panicking compiler is discarded without being
    /// freed.
    pub(super) fn compile<T>(
        &self,
        panics: &Arc<PanicSlot>,
        call: impl FnOnce(&mut dyn QueryCompiler) -> Result<T, CompileError>,
    ) -> Option<Result<T>> {
        let mut slot = self.lock_compiler();
        let instance = slot.as_mut()?;

        let result = compiler::guarded(panics, || call(&mut **instance));
        if matches!(&result, Err(err) if err.is_panic()) {
            slot.take();
        }
        Some(result)
    }

    pub(super) fn take_compiler(&self) -> Option<Box<dyn QueryCompiler>> {
        self.lock_compiler().take()
    }

    fn lock_compiler(&self) -> MutexGuard<'_, Option<Box<dyn QueryCompiler>>> {
        self.compiler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
