mod adhoc;
mod driver;
mod expression_evaluation_failed;
mod initialization;
mod invalid_isolation_level;
mod invalid_result;
mod known_request;
mod panic;
mod record_not_found;
mod too_many_records;
mod transaction_closed;
mod transaction_execution_timeout;
mod transaction_internal;
mod transaction_manager;
mod transaction_not_found;
mod transaction_rolled_back;
mod transaction_start_timeout;
mod unknown_request;

use adhoc::AdhocError;
pub use driver::DriverErrorKind;
use driver::DriverError;
use expression_evaluation_failed::ExpressionEvaluationFailed;
use initialization::InitializationError;
use invalid_isolation_level::InvalidIsolationLevel;
use invalid_result::InvalidResultError;
use known_request::KnownRequestError;
use panic::PanicError;
use record_not_found::RecordNotFoundError;
use std::sync::Arc;
use too_many_records::TooManyRecordsError;
use transaction_closed::TransactionClosed;
use transaction_execution_timeout::TransactionExecutionTimeout;
use transaction_internal::TransactionInternalError;
use transaction_manager::TransactionManagerError;
use transaction_not_found::TransactionNotFound;
use transaction_rolled_back::TransactionRolledBack;
use transaction_start_timeout::TransactionStartTimeout;
use unknown_request::UnknownRequestError;

/// Returns early with an ad-hoc [`Error`](crate::Error) built from a format
/// string.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::from_args(format_args!($($arg)*)))
    };
}

/// Builds an ad-hoc [`Error`](crate::Error) from a format string.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        $crate::Error::from_args(format_args!($($arg)*))
    };
}

/// An error that can occur in Quarry.
#[derive(Clone)]
pub struct Error {
    inner: Option<Arc<ErrorInner>>,
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    cause: Option<Error>,
}

impl Error {
    /// Adds context to this error.
    ///
    /// Context is displayed in reverse order: the most recently added context is shown first,
    /// followed by earlier context, ending with the root cause.
    #[inline(always)]
    pub fn context(self, consequent: impl IntoError) -> Error {
        self.context_impl(consequent.into_error())
    }

    #[inline(never)]
    #[cold]
    fn context_impl(self, consequent: Error) -> Error {
        let mut inner = match consequent.inner {
            Some(inner) => inner,
            None => Arc::new(ErrorInner {
                kind: ErrorKind::Unknown,
                cause: None,
            }),
        };

        if let Some(slot) = Arc::get_mut(&mut inner).filter(|slot| slot.cause.is_none()) {
            slot.cause = Some(self);
            return Error { inner: Some(inner) };
        }

        // The consequent is shared or already has a cause; keep its message.
        let message = Error { inner: Some(inner) }.to_string();
        Error {
            inner: Some(Arc::new(ErrorInner {
                kind: ErrorKind::Adhoc(AdhocError::new(message)),
                cause: Some(self),
            })),
        }
    }

    fn chain(&self) -> impl Iterator<Item = &Error> {
        let mut err = self;
        core::iter::once(err).chain(core::iter::from_fn(move || {
            err = err.inner.as_ref().and_then(|inner| inner.cause.as_ref())?;
            Some(err)
        }))
    }

    fn kind(&self) -> &ErrorKind {
        self.inner
            .as_ref()
            .map(|inner| &inner.kind)
            .unwrap_or(&ErrorKind::Unknown)
    }

    /// The user-facing error code, when the failure has one.
    ///
    /// Transaction API errors all report `P2028`.
    pub fn code(&self) -> Option<&str> {
        use self::ErrorKind::*;

        match self.kind() {
            KnownRequest(err) => Some(&err.code),
            Initialization(err) => err.code.as_deref(),
            Driver(_) => self.driver_code(),
            TransactionNotFound(_)
            | TransactionClosed(_)
            | TransactionRolledBack(_)
            | TransactionExecutionTimeout(_)
            | TransactionStartTimeout(_)
            | InvalidIsolationLevel(_)
            | TransactionManager(_)
            | TransactionInternal(_) => Some("P2028"),
            _ => None,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.kind() {
            ErrorKind::Driver(err) => Some(err),
            ErrorKind::Anyhow(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let mut it = self.chain().peekable();
        while let Some(err) = it.next() {
            core::fmt::Display::fmt(err.kind(), f)?;
            if it.peek().is_some() {
                f.write_str(": ")?;
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        if !f.alternate() {
            core::fmt::Display::fmt(self, f)
        } else {
            let Some(ref inner) = self.inner else {
                return f.debug_struct("Error").field("kind", &"None").finish();
            };
            f.debug_struct("Error")
                .field("kind", &inner.kind)
                .field("cause", &inner.cause)
                .finish()
        }
    }
}

#[derive(Debug)]
enum ErrorKind {
    Anyhow(anyhow::Error),
    Adhoc(AdhocError),
    Driver(DriverError),
    Initialization(InitializationError),
    KnownRequest(KnownRequestError),
    UnknownRequest(UnknownRequestError),
    Panic(PanicError),
    ExpressionEvaluationFailed(ExpressionEvaluationFailed),
    TooManyRecords(TooManyRecordsError),
    RecordNotFound(RecordNotFoundError),
    InvalidResult(InvalidResultError),
    TransactionNotFound(TransactionNotFound),
    TransactionClosed(TransactionClosed),
    TransactionRolledBack(TransactionRolledBack),
    TransactionExecutionTimeout(TransactionExecutionTimeout),
    TransactionStartTimeout(TransactionStartTimeout),
    InvalidIsolationLevel(InvalidIsolationLevel),
    TransactionManager(TransactionManagerError),
    TransactionInternal(TransactionInternalError),
    Unknown,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        use self::ErrorKind::*;

        match self {
            Anyhow(err) => core::fmt::Display::fmt(err, f),
            Adhoc(err) => core::fmt::Display::fmt(err, f),
            Driver(err) => core::fmt::Display::fmt(err, f),
            Initialization(err) => core::fmt::Display::fmt(err, f),
            KnownRequest(err) => core::fmt::Display::fmt(err, f),
            UnknownRequest(err) => core::fmt::Display::fmt(err, f),
            Panic(err) => core::fmt::Display::fmt(err, f),
            ExpressionEvaluationFailed(err) => core::fmt::Display::fmt(err, f),
            TooManyRecords(err) => core::fmt::Display::fmt(err, f),
            RecordNotFound(err) => core::fmt::Display::fmt(err, f),
            InvalidResult(err) => core::fmt::Display::fmt(err, f),
            TransactionNotFound(err) => core::fmt::Display::fmt(err, f),
            TransactionClosed(err) => core::fmt::Display::fmt(err, f),
            TransactionRolledBack(err) => core::fmt::Display::fmt(err, f),
            TransactionExecutionTimeout(err) => core::fmt::Display::fmt(err, f),
            TransactionStartTimeout(err) => core::fmt::Display::fmt(err, f),
            InvalidIsolationLevel(err) => core::fmt::Display::fmt(err, f),
            TransactionManager(err) => core::fmt::Display::fmt(err, f),
            TransactionInternal(err) => core::fmt::Display::fmt(err, f),
            Unknown => f.write_str("unknown quarry error"),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Some(Arc::new(ErrorInner { kind, cause: None })),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Error {
        Error::from(ErrorKind::Anyhow(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::from(anyhow::Error::from(err))
    }
}

/// Trait for types that can be converted into an Error.
pub trait IntoError {
    /// Converts this type into an Error.
    fn into_error(self) -> Error;
}

impl IntoError for Error {
    #[inline(always)]
    fn into_error(self) -> Error {
        self
    }
}
