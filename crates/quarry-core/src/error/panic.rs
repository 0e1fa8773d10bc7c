use super::Error;

/// The query compiler panicked. The compiler instance that raised it is
/// never used again.
#[derive(Debug)]
pub(super) struct PanicError {
    message: Box<str>,
}

impl std::error::Error for PanicError {}

impl core::fmt::Display for PanicError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "query compiler panicked: {}", self.message)
    }
}

impl Error {
    pub fn panic(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::Panic(PanicError {
            message: message.into().into(),
        }))
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::Panic(_))
    }
}
