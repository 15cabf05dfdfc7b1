//! Error types and result definitions for replication operations.
//!
//! [`EtlError`] carries a classification ([`ErrorKind`]), a static description, optional dynamic
//! detail, an optional source error, the callsite location and a captured backtrace. Failures of
//! several independent workers are aggregated into a single [`EtlError`].

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for replication operations using [`EtlError`] as the error type.
pub type EtlResult<T> = Result<T, EtlError>;

/// Detailed payload stored for single [`EtlError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for replication operations.
#[derive(Debug, Clone)]
pub struct EtlError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, mainly produced when several workers fail.
    Many {
        errors: Vec<EtlError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during replication.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Schema conflicts
    ColumnExists,
    ColumnMissing,
    DistributionColumnExists,

    // Policy violations
    NonPrimaryKeyColumn,

    // Source errors
    SourceThrottled,
    SourceServerError,
    SourceQueryFailed,
    SourceTableMissing,
    SourceConnectionFailed,
    AuthenticationError,
    ChangeStreamNotEnabled,

    // Destination errors
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationTableAlreadyExists,
    DestinationTableMissing,

    // Data & conversion errors
    ConversionError,
    InvalidData,

    // Configuration errors
    ConfigError,

    // IO & serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    // State & workflow errors
    InvalidState,
    TableWorkerPanic,
    StreamWorkerPanic,

    // Unknown / uncategorized
    Unknown,
}

impl EtlError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the inner errors when this is an aggregate.
    pub fn errors(&self) -> Option<&[EtlError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns `true` when the failure is a transient source fault worth retrying.
    ///
    /// Only throttling and server-side errors reported by the source qualify. Destination
    /// failures are never retried here.
    pub fn is_transient(&self) -> bool {
        self.kinds()
            .iter()
            .all(|kind| matches!(kind, ErrorKind::SourceThrottled | ErrorKind::SourceServerError))
    }

    /// Returns `true` when every contained error is a domain error that the operator can fix.
    ///
    /// Domain errors are configuration faults (missing change stream, table already present)
    /// and schema conflicts.
    pub fn is_domain_error(&self) -> bool {
        self.kinds().iter().all(|kind| {
            matches!(
                kind,
                ErrorKind::DestinationTableAlreadyExists
                    | ErrorKind::DestinationTableMissing
                    | ErrorKind::ChangeStreamNotEnabled
                    | ErrorKind::SourceTableMissing
                    | ErrorKind::ColumnExists
                    | ErrorKind::ColumnMissing
                    | ErrorKind::DistributionColumnExists
                    | ErrorKind::ConfigError
            )
        })
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first inner error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EtlError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    #[track_caller]
    fn with_std_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f, 1)
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                }

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }

                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes the detail block with indentation.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    let indent_str = "  ".repeat(indent);
    if detail.trim().is_empty() {
        return write!(f, "\n{indent_str}Detail: <empty>");
    }

    write!(f, "\n{indent_str}Detail:")?;
    for line in detail.lines() {
        write!(f, "\n{indent_str}  {line}")?;
    }

    Ok(())
}

/// Creates an [`EtlError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`EtlError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates an [`EtlError`] from a vector of errors for aggregation.
///
/// A vector holding exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for EtlError
where
    E: Into<EtlError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> EtlError {
        let location = Location::caller();

        let mut errors: Vec<EtlError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        EtlError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        EtlError::with_std_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for EtlError {
    #[track_caller]
    fn from(err: serde_json::Error) -> EtlError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        EtlError::with_std_source(kind, description, err)
    }
}

impl From<base64::DecodeError> for EtlError {
    #[track_caller]
    fn from(err: base64::DecodeError) -> EtlError {
        EtlError::with_std_source(ErrorKind::ConversionError, "Base64 decoding failed", err)
    }
}

impl From<std::num::ParseIntError> for EtlError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> EtlError {
        EtlError::with_std_source(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

/// Converts [`tokio_postgres::Error`] by SQLSTATE class.
impl From<tokio_postgres::Error> for EtlError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> EtlError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(sqlstate) => match *sqlstate {
                SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                | SqlState::TOO_MANY_CONNECTIONS
                | SqlState::ADMIN_SHUTDOWN
                | SqlState::CANNOT_CONNECT_NOW => (
                    ErrorKind::DestinationConnectionFailed,
                    "PostgreSQL connection failed",
                ),
                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::AuthenticationError,
                    "PostgreSQL authentication failed",
                ),
                SqlState::DUPLICATE_TABLE => (
                    ErrorKind::DestinationTableAlreadyExists,
                    "PostgreSQL table already exists",
                ),
                SqlState::UNDEFINED_TABLE => (
                    ErrorKind::DestinationTableMissing,
                    "PostgreSQL table not found",
                ),
                SqlState::DUPLICATE_COLUMN => {
                    (ErrorKind::ColumnExists, "PostgreSQL column already exists")
                }
                _ => (
                    ErrorKind::DestinationQueryFailed,
                    "PostgreSQL statement failed",
                ),
            },
            None if err.is_closed() => (
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL connection closed",
            ),
            None => (
                ErrorKind::DestinationQueryFailed,
                "PostgreSQL client operation failed",
            ),
        };

        EtlError::with_std_source(kind, description, err)
    }
}

impl From<sqlx::Error> for EtlError {
    #[track_caller]
    fn from(err: sqlx::Error) -> EtlError {
        let kind = match &err {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                ErrorKind::DestinationConnectionFailed
            }
            sqlx::Error::Configuration(_) => ErrorKind::ConfigError,
            _ => ErrorKind::DestinationQueryFailed,
        };

        EtlError::with_std_source(kind, "Database operation failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, etl_error};

    #[test]
    fn single_error_reports_kind_and_detail() {
        let err = etl_error!(
            ErrorKind::ColumnExists,
            "Column already exists",
            "column `name` in table `users`"
        );

        assert_eq!(err.kind(), ErrorKind::ColumnExists);
        assert_eq!(err.detail(), Some("column `name` in table `users`"));
        assert!(err.errors().is_none());
        assert!(format!("{err}").contains("[ColumnExists] Column already exists"));
    }

    #[test]
    fn aggregating_one_error_returns_it_unchanged() {
        let err: EtlError = vec![etl_error!(ErrorKind::InvalidData, "bad")].into();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.errors().is_none());
    }

    #[test]
    fn aggregated_errors_flatten_kinds() {
        let err: EtlError = vec![
            etl_error!(ErrorKind::SourceThrottled, "throttled"),
            etl_error!(ErrorKind::DestinationQueryFailed, "failed"),
        ]
        .into();

        assert_eq!(
            err.kinds(),
            vec![ErrorKind::SourceThrottled, ErrorKind::DestinationQueryFailed]
        );
        assert_eq!(err.errors().map(|errors| errors.len()), Some(2));
        assert!(format!("{err}").starts_with("[Many] 2 errors aggregated"));
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        assert!(etl_error!(ErrorKind::SourceThrottled, "slow down").is_transient());
        assert!(etl_error!(ErrorKind::SourceServerError, "internal").is_transient());
        assert!(!etl_error!(ErrorKind::SourceQueryFailed, "bad request").is_transient());
    }

    #[test]
    fn domain_classification() {
        assert!(etl_error!(ErrorKind::ChangeStreamNotEnabled, "no stream").is_domain_error());
        assert!(
            etl_error!(ErrorKind::DestinationTableAlreadyExists, "exists").is_domain_error()
        );
        assert!(!etl_error!(ErrorKind::DestinationQueryFailed, "failed").is_domain_error());
    }

    #[test]
    fn bail_returns_early() {
        fn fails() -> EtlResult<()> {
            bail!(ErrorKind::InvalidState, "Invalid state", "stopped");
        }

        let err = fails().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.detail(), Some("stopped"));
    }

    #[test]
    fn io_error_keeps_source() {
        let err: EtlError = std::io::Error::other("disk gone").into();

        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(error::Error::source(&err).is_some());
    }
}
