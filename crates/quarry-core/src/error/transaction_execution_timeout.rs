use std::time::Duration;

use super::Error;

/// An operation targeted a transaction whose execution timer already fired.
#[derive(Debug)]
pub(super) struct TransactionExecutionTimeout {
    operation: Box<str>,
    timeout: Duration,
    elapsed: Duration,
}

impl std::error::Error for TransactionExecutionTimeout {}

impl core::fmt::Display for TransactionExecutionTimeout {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "Transaction API error: Transaction already closed: A {} cannot be executed on an expired transaction. \
             The timeout for this transaction was {} ms, however {} ms passed since the start of the transaction. \
             Consider increasing the interactive transaction timeout or doing less work in the transaction.",
            self.operation,
            self.timeout.as_millis(),
            self.elapsed.as_millis(),
        )
    }
}

impl Error {
    pub fn transaction_execution_timeout(
        operation: impl Into<String>,
        timeout: Duration,
        elapsed: Duration,
    ) -> Error {
        Error::from(super::ErrorKind::TransactionExecutionTimeout(
            TransactionExecutionTimeout {
                operation: operation.into().into(),
                timeout,
                elapsed,
            },
        ))
    }

    pub fn is_transaction_execution_timeout(&self) -> bool {
        matches!(
            self.kind(),
            super::ErrorKind::TransactionExecutionTimeout(_)
        )
    }
}
