use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use crate::entry::display_bytes;

/// Error kinds for driver operations.
///
/// Callers branch on the kind, never on the message. `NotFound` and
/// `AlreadyExists` are expected outcomes; a failed compare-and-swap is not an
/// error at all and is reported through [`CasOutcome`](crate::transaction::CasOutcome).
///
/// # Examples
///
/// ```rust
/// use nosql::errors::{ErrorKind, NoSqlError};
///
/// let err = NoSqlError::new("users/alice not found", ErrorKind::NotFound);
/// assert!(err.is_not_found());
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ErrorKind {
    /// The key or the bucket does not exist
    NotFound,
    /// The bucket already exists
    AlreadyExists,
    /// The backend cannot honor the operation with the required guarantees
    NotImplemented,
    /// A staged write lost a race against a concurrent writer
    Conflict,
    /// Network or backend fault that is safe to retry at the caller's discretion
    Unavailable,
    /// Malformed input, e.g. an empty bucket name
    Invalid,
    /// Unrecognized or malformed driver option
    Configuration,
    /// The driver has been closed
    Closed,
    /// Stored bytes could not be decoded
    Encoding,
    /// Any other backend failure
    Backend,
    /// Internal error (usually indicates a bug)
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::AlreadyExists => write!(f, "Already exists"),
            ErrorKind::NotImplemented => write!(f, "Not implemented"),
            ErrorKind::Conflict => write!(f, "Conflict"),
            ErrorKind::Unavailable => write!(f, "Unavailable"),
            ErrorKind::Invalid => write!(f, "Invalid input"),
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::Closed => write!(f, "Driver closed"),
            ErrorKind::Encoding => write!(f, "Encoding error"),
            ErrorKind::Backend => write!(f, "Backend error"),
            ErrorKind::Internal => write!(f, "Internal error"),
        }
    }
}

/// Error type shared by every driver in the workspace.
///
/// A `NoSqlError` carries a message, an [`ErrorKind`], an optional cause and a
/// lazily resolved backtrace. The cause can be another `NoSqlError` or the native
/// error of a backend client (sqlx, the AWS SDK, fjall, redb), so the original
/// failure stays reachable through [`Error::source`].
///
/// # Examples
///
/// ```rust
/// use nosql::errors::{ErrorKind, NoSqlError};
///
/// let cause = NoSqlError::new("connection reset", ErrorKind::Unavailable);
/// let err = NoSqlError::new_with_cause("failed to get users/alice", ErrorKind::Unavailable, cause);
/// assert!(std::error::Error::source(&err).is_some());
/// ```
#[derive(Clone)]
pub struct NoSqlError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Arc<dyn Error + Send + Sync + 'static>>,
    backtrace: Arc<Backtrace>,
}

impl NoSqlError {
    /// Creates a new `NoSqlError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        NoSqlError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Backtrace::new_unresolved()),
        }
    }

    /// Creates a new `NoSqlError` that keeps `cause` as its source.
    pub fn new_with_cause<E>(message: &str, error_kind: ErrorKind, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        NoSqlError {
            message: message.to_string(),
            error_kind,
            cause: Some(Arc::new(cause)),
            backtrace: Arc::new(Backtrace::new_unresolved()),
        }
    }

    /// `bucket/key not found`
    pub fn not_found(bucket: &[u8], key: &[u8]) -> Self {
        NoSqlError::new(
            &format!("{}/{} not found", display_bytes(bucket), display_bytes(key)),
            ErrorKind::NotFound,
        )
    }

    /// `bucket not found`
    pub fn bucket_not_found(bucket: &[u8]) -> Self {
        NoSqlError::new(
            &format!("bucket {} not found", display_bytes(bucket)),
            ErrorKind::NotFound,
        )
    }

    /// `bucket already exists`
    pub fn bucket_exists(bucket: &[u8]) -> Self {
        NoSqlError::new(
            &format!("bucket {} already exists", display_bytes(bucket)),
            ErrorKind::AlreadyExists,
        )
    }

    pub fn invalid(message: &str) -> Self {
        NoSqlError::new(message, ErrorKind::Invalid)
    }

    pub fn configuration(message: &str) -> Self {
        NoSqlError::new(message, ErrorKind::Configuration)
    }

    pub fn not_implemented(message: &str) -> Self {
        NoSqlError::new(message, ErrorKind::NotImplemented)
    }

    pub fn closed() -> Self {
        NoSqlError::new("driver is closed", ErrorKind::Closed)
    }

    /// Wraps this error with the operation and the bucket/key it was acting on,
    /// keeping the kind so callers can still test for `NotFound` and friends.
    pub fn context(self, action: &str, bucket: &[u8], key: &[u8]) -> Self {
        let message = format!(
            "failed to {} {}/{}",
            action,
            display_bytes(bucket),
            display_bytes(key)
        );
        let kind = self.error_kind;
        NoSqlError::new_with_cause(&message, kind, self)
    }

    /// Like [`NoSqlError::context`] for bucket-level operations.
    pub fn bucket_context(self, action: &str, bucket: &[u8]) -> Self {
        let message = format!("failed to {} {}", action, display_bytes(bucket));
        let kind = self.error_kind;
        NoSqlError::new_with_cause(&message, kind, self)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_not_found(&self) -> bool {
        self.error_kind == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.error_kind == ErrorKind::AlreadyExists
    }

    pub fn is_not_implemented(&self) -> bool {
        self.error_kind == ErrorKind::NotImplemented
    }

    /// True for faults a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Unavailable | ErrorKind::Conflict)
    }
}

impl Display for NoSqlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for NoSqlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let mut backtrace = (*self.backtrace).clone();
                backtrace.resolve();
                write!(f, "{}\n{:?}", self.message, backtrace)
            }
        }
    }
}

impl Error for NoSqlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for driver operations.
pub type NoSqlResult<T> = Result<T, NoSqlError>;

impl From<std::io::Error> for NoSqlError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorKind::Configuration,
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused => ErrorKind::Unavailable,
            _ => ErrorKind::Backend,
        };
        NoSqlError::new_with_cause(&format!("IO error: {}", err), error_kind, err)
    }
}

impl From<std::string::FromUtf8Error> for NoSqlError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        NoSqlError::new_with_cause(
            &format!("UTF-8 encoding error: {}", err),
            ErrorKind::Encoding,
            err,
        )
    }
}

impl From<bincode::error::EncodeError> for NoSqlError {
    fn from(err: bincode::error::EncodeError) -> Self {
        NoSqlError::new(&format!("Encoding failed: {}", err), ErrorKind::Encoding)
    }
}

impl From<bincode::error::DecodeError> for NoSqlError {
    fn from(err: bincode::error::DecodeError) -> Self {
        NoSqlError::new(&format!("Decoding failed: {}", err), ErrorKind::Encoding)
    }
}

impl From<std::num::ParseIntError> for NoSqlError {
    fn from(err: std::num::ParseIntError) -> Self {
        NoSqlError::new_with_cause(
            &format!("Integer parsing error: {}", err),
            ErrorKind::Configuration,
            err,
        )
    }
}

impl From<String> for NoSqlError {
    fn from(msg: String) -> Self {
        NoSqlError::new(&msg, ErrorKind::Internal)
    }
}

impl From<&str> for NoSqlError {
    fn from(msg: &str) -> Self {
        NoSqlError::new(msg, ErrorKind::Internal)
    }
}
