use nosql::errors::{ErrorKind, NoSqlError};
use thiserror::Error;

/// Failure to map between bucket names and redb table names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableNameError {
    #[error("bucket name must not be empty")]
    Empty,
    #[error("table name {0:?} is not a bucket name")]
    Foreign(String),
}

impl From<TableNameError> for NoSqlError {
    fn from(err: TableNameError) -> Self {
        NoSqlError::new(&err.to_string(), ErrorKind::Invalid)
    }
}

/// Converts any redb error into a `NoSqlError`.
///
/// - TableDoesNotExist → NotFound
/// - DatabaseAlreadyOpen, Io → Unavailable (I/O errors are kept as the cause)
/// - ValueTooLarge → Invalid
/// - Corrupted, UpgradeRequired and others → Backend
pub(crate) fn to_nosql_error(error: impl Into<redb::Error>) -> NoSqlError {
    let error: redb::Error = error.into();
    let message = format!("Redb Error: {}", error);
    match error {
        redb::Error::TableDoesNotExist(_) => NoSqlError::new(&message, ErrorKind::NotFound),
        redb::Error::Io(io) => NoSqlError::new_with_cause(&message, ErrorKind::Unavailable, io),
        redb::Error::DatabaseAlreadyOpen => NoSqlError::new(&message, ErrorKind::Unavailable),
        redb::Error::ValueTooLarge(_) => NoSqlError::new(&message, ErrorKind::Invalid),
        _ => NoSqlError::new(&message, ErrorKind::Backend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn maps_variants_to_kinds() {
        let err = to_nosql_error(redb::Error::TableDoesNotExist("users".to_string()));
        assert!(err.is_not_found());

        let err = to_nosql_error(redb::Error::Io(io::Error::new(io::ErrorKind::Other, "disk")));
        assert_eq!(err.kind(), &ErrorKind::Unavailable);
        assert!(err.cause().is_some());

        let err = to_nosql_error(redb::Error::Corrupted("bad page".to_string()));
        assert_eq!(err.kind(), &ErrorKind::Backend);
        assert!(err.message().starts_with("Redb Error:"));
    }
}
