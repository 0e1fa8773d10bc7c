use super::Error;
use crate::driver::{IsolationLevel, Provider};

#[derive(Debug)]
pub(super) struct InvalidIsolationLevel {
    level: IsolationLevel,
    provider: Provider,
}

impl std::error::Error for InvalidIsolationLevel {}

impl core::fmt::Display for InvalidIsolationLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "Transaction API error: Invalid isolation level: {} is not supported by {}",
            self.level, self.provider
        )
    }
}

impl Error {
    pub fn invalid_isolation_level(level: IsolationLevel, provider: Provider) -> Error {
        Error::from(super::ErrorKind::InvalidIsolationLevel(
            InvalidIsolationLevel { level, provider },
        ))
    }

    pub fn is_invalid_isolation_level(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::InvalidIsolationLevel(_))
    }
}
