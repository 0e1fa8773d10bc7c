use super::Error;
use crate::Value;

/// A request failed for a reason that has a user-facing error code.
#[derive(Debug)]
pub(super) struct KnownRequestError {
    pub(super) code: Box<str>,
    message: Box<str>,
    pub(super) meta: Option<Value>,
}

impl std::error::Error for KnownRequestError {}

impl core::fmt::Display for KnownRequestError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error {
    pub fn known_request(
        code: impl Into<String>,
        message: impl Into<String>,
        meta: Option<Value>,
    ) -> Error {
        Error::from(super::ErrorKind::KnownRequest(KnownRequestError {
            code: code.into().into(),
            message: message.into().into(),
            meta,
        }))
    }

    pub fn is_known_request(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::KnownRequest(_))
    }

    /// Structured metadata attached to a known request error.
    pub fn meta(&self) -> Option<&Value> {
        match self.kind() {
            super::ErrorKind::KnownRequest(err) => err.meta.as_ref(),
            _ => None,
        }
    }
}
