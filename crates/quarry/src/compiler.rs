//! Contract for the query compiler that turns JSON queries into plans.

mod panic;
pub use panic::{PanicReporter, PanicSink, PanicSinkGuard, PanicSlot};

use quarry_core::driver::{ConnectionInfo, Provider};
use quarry_core::{async_trait, Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
};

/// Loads the compiler module. Called at most once per successful load; the
/// engine memoizes the returned factory.
#[async_trait]
pub trait CompilerLoader: fmt::Debug + Send + Sync + 'static {
    async fn load(&self) -> Result<Arc<dyn CompilerFactory>>;
}

/// Creates compiler instances bound to one connection.
pub trait CompilerFactory: fmt::Debug + Send + Sync {
    /// `panics` receives panic reports from the instance for its whole
    /// lifetime.
    fn create(
        &self,
        params: CompilerParams,
        panics: PanicReporter,
    ) -> Result<Box<dyn QueryCompiler>, CompileError>;
}

/// A compiler instance. Requests and responses are JSON documents.
pub trait QueryCompiler: Send {
    fn compile(&mut self, request: &str) -> Result<String, CompileError>;

    fn compile_batch(&mut self, request: &str) -> Result<String, CompileError>;

    /// Releases the instance. Not called on instances that panicked.
    fn free(self: Box<Self>);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerParams {
    pub datamodel: String,
    pub provider: Provider,
    pub connection_info: ConnectionInfo,
}

/// Error reported by the compiler for a request it cannot compile.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompileError {
    pub message: String,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub meta: Option<Value>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> CompileError {
        CompileError {
            message: message.into(),
            code: None,
            meta: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> CompileError {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CompileError {}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Error {
        match err.code {
            Some(code) => Error::known_request(code, err.message, err.meta),
            None => Error::unknown_request(err.message),
        }
    }
}

/// Runs a synchronous compiler call with a call-scoped panic sink installed
/// and unwinding caught.
///
/// Both a caught unwind and a panic reported through the sink produce a
/// panic error; the caller must then discard the compiler.
pub(crate) fn guarded<T>(
    slot: &Arc<PanicSlot>,
    call: impl FnOnce() -> Result<T, CompileError>,
) -> Result<T> {
    let reported: Arc<Mutex<Option<String>>> = Arc::default();
    let sink: PanicSink = {
        let reported = reported.clone();
        Arc::new(move |message: &str| {
            reported
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert_with(|| message.to_string());
        })
    };

    let result = {
        let _guard = slot.install(sink);
        catch_unwind(AssertUnwindSafe(call))
    };

    let reported = reported
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    match (result, reported) {
        (Err(payload), _) => {
            let message = panic::payload_message(&*payload);
            tracing::error!(%message, "query compiler panicked");
            Err(Error::panic(message))
        }
        (Ok(_), Some(message)) => {
            tracing::error!(%message, "query compiler reported a panic");
            Err(Error::panic(message))
        }
        (Ok(result), None) => result.map_err(Error::from),
    }
}
