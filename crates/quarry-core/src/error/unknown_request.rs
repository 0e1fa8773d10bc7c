use super::Error;

/// A request failed and the failure carries no error code.
#[derive(Debug)]
pub(super) struct UnknownRequestError {
    message: Box<str>,
}

impl std::error::Error for UnknownRequestError {}

impl core::fmt::Display for UnknownRequestError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error {
    pub fn unknown_request(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::UnknownRequest(UnknownRequestError {
            message: message.into().into(),
        }))
    }

    pub fn is_unknown_request(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::UnknownRequest(_))
    }
}
