use nosql::errors::{ErrorKind, NoSqlError};
use sqlx::error::DatabaseError;
use thiserror::Error;

use crate::dialect::{Dialect, SqlFailure};

/// A bucket name that cannot be used as a table name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("bucket name must not be empty")]
    Empty,
    #[error("bucket name {0:?} is not a SQL identifier")]
    Invalid(String),
    #[error("bucket name is {0} bytes long, the limit is {1}")]
    TooLong(usize, usize),
}

impl From<IdentifierError> for NoSqlError {
    fn from(err: IdentifierError) -> Self {
        NoSqlError::new(&err.to_string(), ErrorKind::Invalid)
    }
}

#[cfg(feature = "mysql")]
fn mysql_number(error: &dyn DatabaseError) -> Option<String> {
    error
        .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
        .map(|err| err.number().to_string())
}

#[cfg(not(feature = "mysql"))]
fn mysql_number(error: &dyn DatabaseError) -> Option<String> {
    error.code().map(|code| code.into_owned())
}

/// Native code of a database error, as [`Dialect::classify`] expects it.
fn native_code(dialect: Dialect, error: &dyn DatabaseError) -> Option<String> {
    match dialect {
        Dialect::Postgres => error.code().map(|code| code.into_owned()),
        Dialect::MySql => mysql_number(error),
    }
}

pub(crate) fn failure(dialect: Dialect, error: &sqlx::Error) -> SqlFailure {
    match error {
        sqlx::Error::Database(db) => native_code(dialect, &**db)
            .map(|code| dialect.classify(&code))
            .unwrap_or(SqlFailure::Other),
        _ => SqlFailure::Other,
    }
}

/// Kind for an SQLSTATE both engines report.
pub(crate) fn kind_for_sqlstate(state: &str) -> ErrorKind {
    match state.get(..2) {
        Some("40") => ErrorKind::Conflict,
        Some("08") | Some("53") | Some("57") | Some("HY") => ErrorKind::Unavailable,
        Some("28") => ErrorKind::Configuration,
        Some("22") => ErrorKind::Invalid,
        Some("42") if state.starts_with("42S02") || state == "42P01" => ErrorKind::NotFound,
        Some("42") => ErrorKind::Invalid,
        _ => ErrorKind::Backend,
    }
}

/// Converts a sqlx error into a `NoSqlError`, keeping it as the cause.
///
/// - Io, Tls, Protocol, PoolTimedOut → Unavailable
/// - PoolClosed → Closed
/// - Configuration → Configuration
/// - decode failures → Encoding
/// - database errors by native code, then by SQLSTATE class
pub(crate) fn to_nosql_error(dialect: Dialect, error: sqlx::Error) -> NoSqlError {
    let kind = match &error {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) | sqlx::Error::PoolTimedOut => {
            ErrorKind::Unavailable
        }
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => ErrorKind::Closed,
        sqlx::Error::Configuration(_) => ErrorKind::Configuration,
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => ErrorKind::Encoding,
        sqlx::Error::Database(db) => match failure(dialect, &error) {
            SqlFailure::DuplicateKey | SqlFailure::TableExists => ErrorKind::AlreadyExists,
            SqlFailure::MissingTable => ErrorKind::NotFound,
            SqlFailure::Other => db
                .code()
                .map(|state| kind_for_sqlstate(&state))
                .unwrap_or(ErrorKind::Backend),
        },
        _ => ErrorKind::Backend,
    };
    let message = format!("{} Error: {}", dialect.name(), error);
    NoSqlError::new_with_cause(&message, kind, error)
}

/// Like [`to_nosql_error`], but a missing table becomes the bucket's `NotFound`.
pub(crate) fn bucket_error(dialect: Dialect, bucket: &[u8], error: sqlx::Error) -> NoSqlError {
    match failure(dialect, &error) {
        SqlFailure::MissingTable => NoSqlError::bucket_not_found(bucket),
        _ => to_nosql_error(dialect, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_side_errors_map_to_kinds() {
        let err = to_nosql_error(Dialect::Postgres, sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), &ErrorKind::Unavailable);
        assert!(err.is_transient());

        let err = to_nosql_error(Dialect::MySql, sqlx::Error::PoolClosed);
        assert_eq!(err.kind(), &ErrorKind::Closed);

        let err = to_nosql_error(Dialect::Postgres, sqlx::Error::ColumnNotFound("nvalue".to_string()));
        assert_eq!(err.kind(), &ErrorKind::Encoding);
        assert!(err.message().starts_with("PostgreSQL Error:"));
        assert!(err.cause().is_some());
    }

    #[test]
    fn sqlstate_classes() {
        assert_eq!(kind_for_sqlstate("40001"), ErrorKind::Conflict);
        assert_eq!(kind_for_sqlstate("40P01"), ErrorKind::Conflict);
        assert_eq!(kind_for_sqlstate("08006"), ErrorKind::Unavailable);
        assert_eq!(kind_for_sqlstate("28P01"), ErrorKind::Configuration);
        assert_eq!(kind_for_sqlstate("22001"), ErrorKind::Invalid);
        assert_eq!(kind_for_sqlstate("42S02"), ErrorKind::NotFound);
        assert_eq!(kind_for_sqlstate("XX000"), ErrorKind::Backend);
    }

    #[test]
    fn non_database_errors_are_not_classified() {
        assert_eq!(failure(Dialect::Postgres, &sqlx::Error::RowNotFound), SqlFailure::Other);
        let err = bucket_error(Dialect::MySql, b"users", sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), &ErrorKind::Unavailable);
    }
}
