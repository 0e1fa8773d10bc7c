pub mod driver;
pub use driver::Driver;

mod error;
pub use error::{DriverErrorKind, Error, IntoError};

/// A Result type alias that uses Quarry's [`Error`] type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Values exchanged with the compiler, the interpreter and the drivers.
pub use serde_json::Value;

pub use async_trait::async_trait;
