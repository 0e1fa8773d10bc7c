use std::{
    any::Any,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Receives panic messages reported by a compiler.
pub type PanicSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Holds the sink currently receiving compiler panic reports.
///
/// The engine owns one slot and installs a call-scoped sink
/// around every compiler call. Outside of a call, reports fall back to the
/// error log.
#[derive(Default)]
pub struct PanicSlot {
    sink: Mutex<Option<PanicSink>>,
}

impl fmt::Debug for PanicSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicSlot")
            .field("installed", &self.lock().is_some())
            .finish()
    }
}

impl PanicSlot {
    pub fn new() -> Arc<PanicSlot> {
        Arc::new(PanicSlot::default())
    }

    /// Installs `sink` until the returned guard is dropped, at which point
    /// the previously installed sink is restored.
    pub fn install(self: &Arc<Self>, sink: PanicSink) -> PanicSinkGuard {
        let previous = self.lock().replace(sink);
        PanicSinkGuard {
            slot: self.clone(),
            previous,
        }
    }

    /// Handle passed to a compiler at construction time.
    pub fn reporter(self: &Arc<Self>) -> PanicReporter {
        PanicReporter { slot: self.clone() }
    }

    fn report(&self, message: &str) {
        // Clone out so the sink runs without the lock held.
        let sink = self.lock().clone();
        match sink {
            Some(sink) => sink(message),
            None => tracing::error!(%message, "query compiler reported a panic outside of a call"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PanicSink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores the previously installed sink on drop.
#[must_use = "the sink is uninstalled as soon as the guard is dropped"]
pub struct PanicSinkGuard {
    slot: Arc<PanicSlot>,
    previous: Option<PanicSink>,
}

impl Drop for PanicSinkGuard {
    fn drop(&mut self) {
        *self.slot.lock() = self.previous.take();
    }
}

/// Lets a compiler report that it panicked.
#[derive(Clone)]
pub struct PanicReporter {
    slot: Arc<PanicSlot>,
}

impl PanicReporter {
    pub fn report(&self, message: &str) {
        self.slot.report(message);
    }
}

impl fmt::Debug for PanicReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicReporter").finish_non_exhaustive()
    }
}

/// Extracts the message of a caught panic payload.
pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
