use super::Error;

/// Invalid use of the transaction API, e.g. missing options.
#[derive(Debug)]
pub(super) struct TransactionManagerError {
    message: Box<str>,
}

impl std::error::Error for TransactionManagerError {}

impl core::fmt::Display for TransactionManagerError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Transaction API error: {}", self.message)
    }
}

impl Error {
    pub fn transaction_manager(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::TransactionManager(
            TransactionManagerError {
                message: message.into().into(),
            },
        ))
    }

    pub fn is_transaction_manager(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::TransactionManager(_))
    }
}
