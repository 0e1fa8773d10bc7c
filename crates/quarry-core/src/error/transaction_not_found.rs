use super::Error;

#[derive(Debug)]
pub(super) struct TransactionNotFound;

impl std::error::Error for TransactionNotFound {}

impl core::fmt::Display for TransactionNotFound {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(
            "Transaction API error: Transaction not found. Transaction ID is invalid, \
             refers to an old closed transaction that is no longer tracked, \
             or was obtained before disconnecting.",
        )
    }
}

impl Error {
    pub fn transaction_not_found() -> Error {
        Error::from(super::ErrorKind::TransactionNotFound(TransactionNotFound))
    }

    pub fn is_transaction_not_found(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::TransactionNotFound(_))
    }
}
