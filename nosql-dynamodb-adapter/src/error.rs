use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use nosql::errors::{ErrorKind, NoSqlError};
use std::error::Error;
use std::fmt::Debug;
use thiserror::Error;

pub(crate) const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailedException";

/// A stored item that does not follow the driver's attribute layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemCodecError {
    #[error("item has no {0} attribute")]
    Missing(&'static str),
    #[error("attribute {0} has the wrong type, expected {1}")]
    WrongType(&'static str, &'static str),
    #[error("unknown pending operation {0:?}")]
    UnknownOperation(String),
}

impl From<ItemCodecError> for NoSqlError {
    fn from(err: ItemCodecError) -> Self {
        NoSqlError::new(&err.to_string(), ErrorKind::Encoding)
    }
}

/// Kind for a DynamoDB error code.
pub(crate) fn kind_for_code(code: Option<&str>) -> ErrorKind {
    match code {
        Some("ResourceNotFoundException") => ErrorKind::NotFound,
        Some("ResourceInUseException") => ErrorKind::AlreadyExists,
        Some(CONDITIONAL_CHECK_FAILED) | Some("TransactionConflictException") => ErrorKind::Conflict,
        Some("ProvisionedThroughputExceededException")
        | Some("ThrottlingException")
        | Some("RequestLimitExceeded")
        | Some("InternalServerError")
        | Some("ServiceUnavailable")
        | Some("LimitExceededException") => ErrorKind::Unavailable,
        Some("ValidationException") | Some("ItemCollectionSizeLimitExceededException") => {
            ErrorKind::Invalid
        }
        Some("AccessDeniedException")
        | Some("UnrecognizedClientException")
        | Some("InvalidSignatureException")
        | Some("ExpiredTokenException")
        | Some("MissingAuthenticationToken") => ErrorKind::Configuration,
        _ => ErrorKind::Backend,
    }
}

/// Converts an AWS SDK error into a `NoSqlError`, keeping it as the cause.
///
/// Transport failures and timeouts become `Unavailable`; service errors are
/// classified by their error code.
pub(crate) fn to_nosql_error<E, R>(error: SdkError<E, R>) -> NoSqlError
where
    E: ProvideErrorMetadata + Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let kind = match &error {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            ErrorKind::Unavailable
        }
        SdkError::ConstructionFailure(_) => ErrorKind::Invalid,
        _ => kind_for_code(error.code()),
    };
    let message = match error.message() {
        Some(detail) => format!("DynamoDB Error: {} ({})", error, detail),
        None => format!("DynamoDB Error: {}", error),
    };
    NoSqlError::new_with_cause(&message, kind, error)
}

/// True when a conditional write was rejected by its condition.
pub(crate) fn is_condition_failure<E, R>(error: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    error.code() == Some(CONDITIONAL_CHECK_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_kinds() {
        assert_eq!(kind_for_code(Some("ResourceNotFoundException")), ErrorKind::NotFound);
        assert_eq!(kind_for_code(Some("ResourceInUseException")), ErrorKind::AlreadyExists);
        assert_eq!(kind_for_code(Some("ThrottlingException")), ErrorKind::Unavailable);
        assert_eq!(kind_for_code(Some("ValidationException")), ErrorKind::Invalid);
        assert_eq!(kind_for_code(Some("AccessDeniedException")), ErrorKind::Configuration);
        assert_eq!(kind_for_code(Some(CONDITIONAL_CHECK_FAILED)), ErrorKind::Conflict);
        assert_eq!(kind_for_code(Some("SomethingNew")), ErrorKind::Backend);
        assert_eq!(kind_for_code(None), ErrorKind::Backend);
    }

    #[test]
    fn codec_errors_are_encoding_errors() {
        let err: NoSqlError = ItemCodecError::WrongType("nvalue", "B").into();
        assert_eq!(err.kind(), &ErrorKind::Encoding);
        assert!(err.message().contains("nvalue"));
    }
}
