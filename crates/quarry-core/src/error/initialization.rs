use super::Error;

/// Error raised while connecting the engine: loading the compiler, opening
/// the adapter or instantiating the compiler.
#[derive(Debug)]
pub(super) struct InitializationError {
    message: Box<str>,
    pub(super) code: Option<Box<str>>,
}

impl std::error::Error for InitializationError {}

impl core::fmt::Display for InitializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "engine initialization failed: {}", self.message)
    }
}

impl Error {
    pub fn initialization(message: impl Into<String>, code: Option<&str>) -> Error {
        Error::from(super::ErrorKind::Initialization(InitializationError {
            message: message.into().into(),
            code: code.map(Into::into),
        }))
    }

    pub fn is_initialization(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::Initialization(_))
    }
}
