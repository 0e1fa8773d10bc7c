use super::Error;

/// The transaction bookkeeping reached a state it should never be in.
#[derive(Debug)]
pub(super) struct TransactionInternalError {
    message: Box<str>,
}

impl std::error::Error for TransactionInternalError {}

impl core::fmt::Display for TransactionInternalError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "Transaction API error: Internal Consistency Error: {}",
            self.message
        )
    }
}

impl Error {
    pub fn transaction_internal(message: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::TransactionInternal(
            TransactionInternalError {
                message: message.into().into(),
            },
        ))
    }
}
