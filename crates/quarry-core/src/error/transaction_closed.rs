use super::Error;

/// An operation targeted a transaction that was already committed.
#[derive(Debug)]
pub(super) struct TransactionClosed {
    operation: Box<str>,
}

impl std::error::Error for TransactionClosed {}

impl core::fmt::Display for TransactionClosed {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "Transaction API error: Transaction already closed: A {} cannot be executed on a committed transaction.",
            self.operation
        )
    }
}

impl Error {
    pub fn transaction_closed(operation: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::TransactionClosed(TransactionClosed {
            operation: operation.into().into(),
        }))
    }

    pub fn is_transaction_closed(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::TransactionClosed(_))
    }
}
