//! Error types for the arbiter Cerbos client.
//!
//! The [`Error`] enum provides structured, matchable error variants covering
//! local validation, transport failures, gRPC status errors, protocol
//! violations and session lifecycle. Every variant belongs to one
//! [`ErrorKind`], which decides how the session reacts to it.
//!
//! ## gRPC Status Code Mapping
//!
//! | gRPC Code | Meaning | Kind |
//! |-----------|---------|------|
//! | `UNAVAILABLE` | PDP temporarily unreachable | Transient |
//! | `DEADLINE_EXCEEDED` | Request timed out | Transient |
//! | `RESOURCE_EXHAUSTED` | PDP shedding load | Transient |
//! | `ABORTED` | Request aborted server-side | Transient |
//! | `UNAUTHENTICATED` | Credentials rejected | Fatal |
//! | `PERMISSION_DENIED` | Caller not allowed to use the PDP | Fatal |
//! | `UNIMPLEMENTED` | PDP does not speak this API version | Fatal |
//! | anything else | PDP rejected the batch | Rejected |

use std::time::Duration;

/// The class an [`Error`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input. Never sent to the network, never retried.
    Validation,
    /// Network or timeout failure. Retried up to the configured budget.
    Transient,
    /// Authentication rejected or protocol mismatch. Closes the session.
    Fatal,
    /// Unmatched, duplicate or missing correlation. The session stays up.
    Protocol,
    /// The PDP answered with a non-retryable error for this batch.
    Rejected,
    /// Caller-side outcome: cancellation, wait timeout, closed session.
    Caller,
}

/// Errors returned by the arbiter Cerbos client.
///
/// `Error` is `Clone` so a single transport failure can be delivered to every
/// pending check of the batch it hit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Local validation failures before a request is queued.
    ///
    /// Examples: empty principal id, empty role set, empty or duplicate
    /// action names, inconsistent configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection-level failures: connection refused, DNS resolution failure,
    /// TLS handshake errors, channel closed.
    #[error("transport error: {0}")]
    Transport(String),

    /// gRPC status errors returned by the Cerbos PDP.
    #[error("Cerbos error ({code:?}): {message}")]
    Status {
        /// The gRPC status code.
        code: tonic::Code,
        /// Human-readable error message from the server.
        message: String,
    },

    /// The PDP did not answer within the dispatch deadline.
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Transient failures persisted past the retry budget.
    #[error("service unavailable after {attempts} attempts: {last}")]
    Unavailable {
        /// How many times the batch was sent.
        attempts: u32,
        /// The failure observed on the final attempt.
        last: Box<Error>,
    },

    /// The PDP does not speak this client's protocol, e.g. it lacks the
    /// `CheckResources` method. Closes the session.
    #[error("fatal transport error: {0}")]
    Fatal(String),

    /// The PDP answered with a result that could not be matched to exactly
    /// one outstanding request, or never answered a request of a batch.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The session is permanently closed. Build a new client to continue.
    #[error("session closed: {reason}; build a new client to continue")]
    SessionClosed {
        /// Why the session closed.
        reason: String,
    },

    /// The pending check was cancelled before a result arrived.
    #[error("check cancelled")]
    Cancelled,

    /// The caller stopped waiting for a result.
    #[error("no decision within {0:?}")]
    Timeout(Duration),

    /// Protobuf encode/decode failures. Indicates a bug or API version mismatch.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns the class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::Validation,
            Error::Transport(_) | Error::DeadlineExceeded(_) | Error::Unavailable { .. } => {
                ErrorKind::Transient
            }
            Error::Status { code, .. } => match code {
                tonic::Code::Unavailable
                | tonic::Code::DeadlineExceeded
                | tonic::Code::ResourceExhausted
                | tonic::Code::Aborted => ErrorKind::Transient,
                tonic::Code::Unauthenticated
                | tonic::Code::PermissionDenied
                | tonic::Code::Unimplemented => ErrorKind::Fatal,
                _ => ErrorKind::Rejected,
            },
            Error::Fatal(_) => ErrorKind::Fatal,
            Error::ProtocolViolation(_) | Error::Serialization(_) => ErrorKind::Protocol,
            Error::SessionClosed { .. } | Error::Cancelled | Error::Timeout(_) => {
                ErrorKind::Caller
            }
        }
    }

    /// Returns `true` if this error is transient and the batch may succeed if
    /// sent again.
    ///
    /// `Unavailable` is transient in kind but is the terminal outcome of
    /// retrying, so it is not itself retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient && !matches!(self, Error::Unavailable { .. })
    }

    /// Returns `true` if this error closes the session.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Returns the gRPC status code if this is a `Status` error.
    pub fn code(&self) -> Option<tonic::Code> {
        match self {
            Error::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn from_status(status: tonic::Status) -> Self {
        Error::Status {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
