use super::Error;

/// Failure category reported by a driver adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverErrorKind {
    UniqueConstraintViolation { constraint: Option<String> },
    ForeignKeyConstraintViolation { constraint: Option<String> },
    NullConstraintViolation { constraint: Option<String> },
    TableDoesNotExist { table: Option<String> },
    ColumnNotFound { column: Option<String> },
    TransactionWriteConflict,
    Other { message: String },
}

impl DriverErrorKind {
    fn name(&self) -> &'static str {
        match self {
            DriverErrorKind::UniqueConstraintViolation { .. } => "UniqueConstraintViolation",
            DriverErrorKind::ForeignKeyConstraintViolation { .. } => {
                "ForeignKeyConstraintViolation"
            }
            DriverErrorKind::NullConstraintViolation { .. } => "NullConstraintViolation",
            DriverErrorKind::TableDoesNotExist { .. } => "TableDoesNotExist",
            DriverErrorKind::ColumnNotFound { .. } => "ColumnNotFound",
            DriverErrorKind::TransactionWriteConflict => "TransactionWriteConflict",
            DriverErrorKind::Other { .. } => "Other",
        }
    }

    /// The user-facing error code for this failure, if it has one.
    fn code(&self) -> Option<&'static str> {
        match self {
            DriverErrorKind::UniqueConstraintViolation { .. } => Some("P2002"),
            DriverErrorKind::ForeignKeyConstraintViolation { .. } => Some("P2003"),
            DriverErrorKind::NullConstraintViolation { .. } => Some("P2011"),
            DriverErrorKind::TableDoesNotExist { .. } => Some("P2021"),
            DriverErrorKind::ColumnNotFound { .. } => Some("P2022"),
            DriverErrorKind::TransactionWriteConflict => Some("P2034"),
            DriverErrorKind::Other { .. } => None,
        }
    }
}

/// Error from a database driver.
#[derive(Debug)]
pub(super) struct DriverError {
    kind: DriverErrorKind,
}

impl std::error::Error for DriverError {}

impl core::fmt::Display for DriverError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        fn target(name: &Option<String>) -> &str {
            name.as_deref().unwrap_or("(not available)")
        }

        match &self.kind {
            DriverErrorKind::UniqueConstraintViolation { constraint } => {
                write!(f, "Unique constraint failed on the {}", target(constraint))
            }
            DriverErrorKind::ForeignKeyConstraintViolation { constraint } => write!(
                f,
                "Foreign key constraint violated on the {}",
                target(constraint)
            ),
            DriverErrorKind::NullConstraintViolation { constraint } => {
                write!(f, "Null constraint violation on the {}", target(constraint))
            }
            DriverErrorKind::TableDoesNotExist { table } => write!(
                f,
                "The table `{}` does not exist in the current database.",
                target(table)
            ),
            DriverErrorKind::ColumnNotFound { column } => write!(
                f,
                "The column `{}` does not exist in the current database.",
                target(column)
            ),
            DriverErrorKind::TransactionWriteConflict => f.write_str(
                "Transaction failed due to a write conflict or a deadlock. Please retry your transaction",
            ),
            DriverErrorKind::Other { message } => f.write_str(message),
        }
    }
}

impl Error {
    /// Creates an error from a driver failure.
    pub fn driver(kind: DriverErrorKind) -> Error {
        Error::from(super::ErrorKind::Driver(DriverError { kind }))
    }

    /// Returns `true` if this error is a driver error.
    pub fn is_driver(&self) -> bool {
        matches!(self.kind(), super::ErrorKind::Driver(_))
    }

    /// Returns the driver failure category, if this is a driver error.
    pub fn driver_error_kind(&self) -> Option<&DriverErrorKind> {
        match self.kind() {
            super::ErrorKind::Driver(err) => Some(&err.kind),
            _ => None,
        }
    }

    /// Converts a driver error carrying a known failure category into a
    /// known request error with the matching code. Any other error is
    /// returned unchanged.
    pub fn into_user_facing(self) -> Error {
        let super::ErrorKind::Driver(err) = self.kind() else {
            return self;
        };

        match err.kind.code() {
            Some(code) => Error::known_request(
                code,
                err.to_string(),
                Some(serde_json::json!({ "driverAdapterError": err.kind.name() })),
            ),
            None => self,
        }
    }

    pub(super) fn driver_code(&self) -> Option<&'static str> {
        self.driver_error_kind().and_then(DriverErrorKind::code)
    }
}

