use super::Error;

/// An operation targeted a transaction that was already rolled back.
#[derive(Debug)]
pub(super) struct TransactionRolledBack {
    operation: Box<str>,
}

impl std::error::Error for TransactionRolledBack {}

impl core::fmt::Display for TransactionRolledBack {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "Transaction API error: Transaction already closed: A {} cannot be executed on a transaction that was rolled back.",
            self.operation
        )
    }
}

impl Error {
    pub fn transaction_rolled_back(operation: impl Into<String>) -> Error {
        Error::from(super::ErrorKind::TransactionRolledBack(
            TransactionRolledBack {
                operation: operation.into().into(),
            },
        ))
    }

    pub fn is_transaction_rolled_back(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::TransactionRolledBack(_))
    }
}
