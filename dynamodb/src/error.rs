use std::error::Error;
use std::fmt::Debug;

use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use etl::error::{ErrorKind, EtlError};
use etl::etl_error;

/// Error codes returned when the caller exceeds its provisioned or account limits.
const THROTTLING_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
    "LimitExceededException",
];

const SERVER_CODES: &[&str] = &["InternalServerError", "ServiceUnavailable"];

const AUTHENTICATION_CODES: &[&str] = &[
    "UnrecognizedClientException",
    "InvalidSignatureException",
    "MissingAuthenticationTokenException",
    "AccessDeniedException",
    "ExpiredTokenException",
];

/// Classifies a service error by its code. A response without a code is a server fault.
fn service_error_kind(code: Option<&str>) -> ErrorKind {
    match code {
        None => ErrorKind::SourceServerError,
        Some(code) if THROTTLING_CODES.contains(&code) => ErrorKind::SourceThrottled,
        Some(code) if SERVER_CODES.contains(&code) => ErrorKind::SourceServerError,
        Some("ResourceNotFoundException") => ErrorKind::SourceTableMissing,
        Some(code) if AUTHENTICATION_CODES.contains(&code) => ErrorKind::AuthenticationError,
        Some(_) => ErrorKind::SourceQueryFailed,
    }
}

/// Converts a failed SDK call of `operation` into an [`EtlError`].
///
/// Timeouts and malformed responses count as server faults so that they are retried.
pub(crate) fn sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> EtlError
where
    E: ProvideErrorMetadata + Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::ServiceError(context) => service_error_kind(context.err().code()),
        SdkError::TimeoutError(_) | SdkError::ResponseError(_) => ErrorKind::SourceServerError,
        SdkError::DispatchFailure(_) => ErrorKind::SourceConnectionFailed,
        _ => ErrorKind::SourceQueryFailed,
    };
    let context = format!("{operation}: {}", DisplayErrorContext(&err));

    etl_error!(kind, "Source request failed", context, source: err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_classified_by_code() {
        assert_eq!(
            service_error_kind(Some("ProvisionedThroughputExceededException")),
            ErrorKind::SourceThrottled
        );
        assert_eq!(
            service_error_kind(Some("ThrottlingException")),
            ErrorKind::SourceThrottled
        );
        assert_eq!(
            service_error_kind(Some("InternalServerError")),
            ErrorKind::SourceServerError
        );
        assert_eq!(service_error_kind(None), ErrorKind::SourceServerError);
        assert_eq!(
            service_error_kind(Some("ResourceNotFoundException")),
            ErrorKind::SourceTableMissing
        );
        assert_eq!(
            service_error_kind(Some("UnrecognizedClientException")),
            ErrorKind::AuthenticationError
        );
        assert_eq!(
            service_error_kind(Some("ValidationException")),
            ErrorKind::SourceQueryFailed
        );
    }

    #[test]
    fn throttling_is_transient() {
        let err = etl_error!(service_error_kind(Some("RequestLimitExceeded")), "Source request failed");

        assert!(err.is_transient());
    }
}
