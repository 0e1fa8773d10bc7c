use std::time::Duration;

use super::Error;

/// The driver did not open the transaction within `max_wait`.
#[derive(Debug)]
pub(super) struct TransactionStartTimeout {
    max_wait: Duration,
}

impl std::error::Error for TransactionStartTimeout {}

impl core::fmt::Display for TransactionStartTimeout {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "Transaction API error: Unable to start a transaction in the given time ({} ms).",
            self.max_wait.as_millis()
        )
    }
}

impl Error {
    pub fn transaction_start_timeout(max_wait: Duration) -> Error {
        Error::from(super::ErrorKind::TransactionStartTimeout(
            TransactionStartTimeout { max_wait },
        ))
    }

    pub fn is_transaction_start_timeout(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::TransactionStartTimeout(_))
    }
}
