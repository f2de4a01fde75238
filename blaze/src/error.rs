//! # Protocol Errors
//!
//! Every failure that crosses a blaze service boundary is an [`Error`]: a single value type
//! carrying one of the closed [`ErrorKind`]s, a human readable message, string metadata and,
//! for [`ErrorKind::Internal`] only, an optional wrapped cause.
//!
//! ## Metadata
//!
//! Metadata is copy-on-write. [`Error::with_meta`] always returns a new value owning a fresh
//! map, so a shared base error can be decorated from any number of tasks without ever
//! observing a change to its own metadata.
//!
//! ## Equivalence
//!
//! [`Error::is`] compares the kind and the string form of the wrapped cause only. Message
//! and metadata are ignored.
use crate::BoxError;
use http::StatusCode;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// The closed set of error categories understood by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// The operation was cancelled, typically by the caller.
    Canceled,
    /// An error was raised by an API that did not return enough information.
    Unknown,
    /// The client specified an invalid argument.
    InvalidArgument,
    /// The client sent a message which could not be decoded.
    Malformed,
    /// The operation expired before completion.
    DeadlineExceeded,
    /// Some requested entity was not found.
    NotFound,
    /// The requested URL path was not routable to a method.
    BadRoute,
    /// An attempt to create an entity failed because one already exists.
    AlreadyExists,
    /// The caller does not have permission to execute the operation.
    PermissionDenied,
    /// The request does not have valid authentication credentials.
    Unauthenticated,
    /// Some resource has been exhausted, such as a per-user quota.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted, typically due to a concurrency issue.
    Aborted,
    /// The operation was attempted past the valid range.
    OutOfRange,
    /// The operation is not implemented or not supported.
    Unimplemented,
    /// Invariants expected by the underlying system have been broken.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 18] = [
        ErrorKind::Canceled,
        ErrorKind::Unknown,
        ErrorKind::InvalidArgument,
        ErrorKind::Malformed,
        ErrorKind::DeadlineExceeded,
        ErrorKind::NotFound,
        ErrorKind::BadRoute,
        ErrorKind::AlreadyExists,
        ErrorKind::PermissionDenied,
        ErrorKind::Unauthenticated,
        ErrorKind::ResourceExhausted,
        ErrorKind::FailedPrecondition,
        ErrorKind::Aborted,
        ErrorKind::OutOfRange,
        ErrorKind::Unimplemented,
        ErrorKind::Internal,
        ErrorKind::Unavailable,
        ErrorKind::DataLoss,
    ];

    /// The stable tag written to the `type` field of an error envelope.
    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::Canceled => "canceled",
            ErrorKind::Unknown => "unknown",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Malformed => "malformed",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRoute => "bad_route",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::FailedPrecondition => "failed_precondition",
            ErrorKind::Aborted => "aborted",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Internal => "internal",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DataLoss => "data_loss",
        }
    }

    /// Looks a wire tag up in the static kind registry.
    ///
    /// # Returns
    /// * `Some(kind)` - The tag names one of the closed kinds.
    /// * `None` - The tag is unknown and the envelope carrying it cannot be trusted.
    pub fn from_tag(tag: &str) -> Option<ErrorKind> {
        ErrorKind::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// The HTTP status a server responds with when failing with this kind.
    pub fn http_status(self) -> StatusCode {
        match self {
            ErrorKind::Canceled => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::Malformed => StatusCode::BAD_REQUEST,
            ErrorKind::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRoute => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorKind::Aborted => StatusCode::CONFLICT,
            ErrorKind::OutOfRange => StatusCode::BAD_REQUEST,
            ErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The closest gRPC status code, used as span status and for `tonic` interop.
    pub fn grpc_code(self) -> tonic::Code {
        match self {
            ErrorKind::Canceled => tonic::Code::Cancelled,
            ErrorKind::Unknown => tonic::Code::Unknown,
            ErrorKind::InvalidArgument => tonic::Code::InvalidArgument,
            ErrorKind::Malformed => tonic::Code::InvalidArgument,
            ErrorKind::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            ErrorKind::NotFound => tonic::Code::NotFound,
            ErrorKind::BadRoute => tonic::Code::NotFound,
            ErrorKind::AlreadyExists => tonic::Code::AlreadyExists,
            ErrorKind::PermissionDenied => tonic::Code::PermissionDenied,
            ErrorKind::Unauthenticated => tonic::Code::Unauthenticated,
            ErrorKind::ResourceExhausted => tonic::Code::ResourceExhausted,
            ErrorKind::FailedPrecondition => tonic::Code::FailedPrecondition,
            ErrorKind::Aborted => tonic::Code::Aborted,
            ErrorKind::OutOfRange => tonic::Code::OutOfRange,
            ErrorKind::Unimplemented => tonic::Code::Unimplemented,
            ErrorKind::Internal => tonic::Code::Internal,
            ErrorKind::Unavailable => tonic::Code::Unavailable,
            ErrorKind::DataLoss => tonic::Code::DataLoss,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// A protocol error.
///
/// Cloning is cheap: the metadata map and the cause are reference counted and never mutated
/// in place.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    meta: Arc<BTreeMap<String, String>>,
    cause: Option<Cause>,
}

impl Error {
    /// Builds an error of the given kind with empty metadata.
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            meta: Arc::default(),
            cause: None,
        }
    }

    pub fn canceled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, msg)
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, msg)
    }

    /// An `InvalidArgument` error about a single argument.
    ///
    /// The message is `"<argument> <validation_msg>"` and the argument name is recorded under
    /// the `argument` metadata key.
    pub fn invalid_argument(argument: &str, validation_msg: &str) -> Self {
        Self::new(
            ErrorKind::InvalidArgument,
            format!("{argument} {validation_msg}"),
        )
        .with_meta("argument", argument)
    }

    /// Shorthand for an `InvalidArgument` error reporting a missing argument.
    pub fn required_argument(argument: &str) -> Self {
        Self::invalid_argument(argument, "is_required")
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, msg)
    }

    pub fn deadline_exceeded(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn bad_route(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRoute, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, msg)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, msg)
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, msg)
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, msg)
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, msg)
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, msg)
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, msg)
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    /// An `Internal` error wrapping the error that caused it.
    pub fn internal_with(cause: impl Into<BoxError>, msg: impl Into<String>) -> Self {
        let cause: BoxError = cause.into();
        Self {
            cause: Some(Arc::from(cause)),
            ..Self::internal(msg)
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }

    pub fn data_loss(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataLoss, msg)
    }

    /// Converts an arbitrary error into a protocol error.
    ///
    /// A boxed [`Error`] is recovered as-is. Anything else becomes an `Internal` error whose
    /// message is `"Internal error: <msg>: <err>"` and whose cause is the original error.
    pub fn wrap(err: impl Into<BoxError>, msg: &str) -> Self {
        match err.into().downcast::<Error>() {
            Ok(err) => *err,
            Err(other) => {
                let msg = format!("Internal error: {msg}: {other}");
                Self::internal_with(other, msg)
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// The metadata value for `key`, or an empty string if it is not set.
    pub fn meta(&self, key: &str) -> &str {
        self.meta.get(key).map(String::as_str).unwrap_or_default()
    }

    /// A snapshot of the metadata. Changing it does not affect this error.
    pub fn meta_map(&self) -> BTreeMap<String, String> {
        self.meta.as_ref().clone()
    }

    /// Returns a new error with `key` set to `value`.
    ///
    /// The receiver is left untouched: the returned value owns a fresh copy of the metadata.
    #[must_use]
    pub fn with_meta(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut meta = self.meta.as_ref().clone();
        meta.insert(key.into(), value.into());
        Self {
            kind: self.kind,
            msg: self.msg.clone(),
            meta: Arc::new(meta),
            cause: self.cause.clone(),
        }
    }

    /// The wrapped cause of an `Internal` error.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Reports whether `other` is the same error: same kind and same cause string.
    ///
    /// Message and metadata do not take part in the comparison.
    pub fn is(&self, other: &Error) -> bool {
        self.kind == other.kind && self.cause_string() == other.cause_string()
    }

    pub fn http_status(&self) -> StatusCode {
        self.kind.http_status()
    }

    pub(crate) fn cause_string(&self) -> String {
        match (&self.cause, self.kind) {
            (Some(cause), ErrorKind::Internal) => cause.to_string(),
            (_, kind) => kind.tag().to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blaze error {}: {}", self.kind, self.msg)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        tonic::Status::new(err.kind.grpc_code(), err.msg)
    }
}

/// Maps any error to the HTTP status a server would answer with.
///
/// # Returns
/// * `Some(status)` - `err` is a protocol [`Error`].
/// * `None` - `err` is not a protocol error.
pub fn server_http_status(err: &(dyn StdError + 'static)) -> Option<StatusCode> {
    err.downcast_ref::<Error>().map(Error::http_status)
}
