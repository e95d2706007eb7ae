use nosql::errors::{ErrorKind, NoSqlError};
use std::error::Error;
use thiserror::Error;

/// Failure to map a bucket name onto a fjall partition name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionNameError {
    #[error("bucket name must not be empty")]
    Empty,
    #[error("bucket name encodes to {0} characters, fjall allows at most {1}")]
    TooLong(usize, usize),
    #[error("partition name {0:?} is not a bucket name")]
    Foreign(String),
}

impl From<PartitionNameError> for NoSqlError {
    fn from(err: PartitionNameError) -> Self {
        NoSqlError::new(&err.to_string(), ErrorKind::Invalid)
    }
}

/// Converts a fjall error into a `NoSqlError`, keeping it as the cause.
///
/// - "closed", "poisoned" → Closed
/// - "deleted" → NotFound (the partition was dropped while in use)
/// - "corrupt", "recovery", "version" → Backend
/// - I/O failures → Unavailable
/// - Other → Backend
pub(crate) fn to_nosql_error<E>(error: E) -> NoSqlError
where
    E: Error + Send + Sync + 'static,
{
    let error_msg = error.to_string();
    let lowered = error_msg.to_lowercase();
    let error_kind = if lowered.contains("closed") || lowered.contains("poisoned") {
        ErrorKind::Closed
    } else if is_partition_deleted_error(&error_msg) {
        ErrorKind::NotFound
    } else if lowered.contains("corrupt") || lowered.contains("recovery") || lowered.contains("version") {
        ErrorKind::Backend
    } else if lowered.contains("io error") || lowered.contains("os error") {
        ErrorKind::Unavailable
    } else {
        ErrorKind::Backend
    };
    NoSqlError::new_with_cause(&format!("Fjall Error: {}", error_msg), error_kind, error)
}

#[inline]
pub(crate) fn is_partition_deleted_error(err_msg: &str) -> bool {
    err_msg.contains("deleted") || err_msg.contains("PartitionDeleted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn maps_messages_to_kinds() {
        let err = to_nosql_error(io::Error::new(io::ErrorKind::Other, "PartitionDeleted"));
        assert!(err.is_not_found());

        let err = to_nosql_error(io::Error::new(io::ErrorKind::Other, "keyspace is poisoned"));
        assert_eq!(err.kind(), &ErrorKind::Closed);

        let err = to_nosql_error(io::Error::new(io::ErrorKind::Other, "block is corrupt"));
        assert_eq!(err.kind(), &ErrorKind::Backend);
        assert!(err.message().starts_with("Fjall Error:"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn name_errors_are_invalid() {
        let err: NoSqlError = PartitionNameError::TooLong(600, 255).into();
        assert_eq!(err.kind(), &ErrorKind::Invalid);
        assert!(err.message().contains("600"));
    }
}
