//! Subscription Client Error Hierarchy
//!
//! Defines the error types raised by the subscription worker, the operation
//! channel and the transports, categorized by the layer that produced them.
//! [`Error::kind`] folds the hierarchy into the routing classes the worker's
//! reconnect loop acts on.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;
use tonic::Code;
use tonic::Status;

use crate::ChangeVector;
use crate::CloseReason;

/// Boxed error produced by user batch logic
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Subscription lifecycle and server-side state failures
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// User batch processing failures
    #[error(transparent)]
    Subscriber(#[from] SubscriberError),

    /// Infrastructure-level failures (connect, stream, timeouts)
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Malformed or out-of-order frames
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Routing class of an [`Error`]
///
/// Decides whether the reconnect policy is consulted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Never retried, surfaced to the caller, worker ends `Faulted`
    Fatal,
    /// Subscription closed server-side (admin action or takeover)
    Closed,
    /// User logic raised while processing a batch
    Subscriber,
    /// Connection rejected by the opening strategy
    ConnectionInUse,
    /// Network hiccups and timeouts
    Transient,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Database '{database}' does not exist")]
    DatabaseDoesNotExist { database: String },

    #[error("Subscription '{name}' does not exist")]
    SubscriptionDoesNotExist { name: String },

    #[error("Subscription '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Subscription '{name}' is in an invalid state: {reason}")]
    InvalidState { name: String, reason: String },

    #[error("Invalid subscription definition: {0}")]
    InvalidDefinition(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Another connection holds the subscription (OpenIfFree / TakeOver rejection)
    #[error("Subscription '{name}' is in use by another connection")]
    InUse { name: String },

    #[error("Subscription '{name}' was closed: {reason}")]
    Closed { name: String, reason: CloseReason },

    #[error("Subscription worker for '{name}' is already running")]
    AlreadyRunning { name: String },

    /// Transient failures lasted longer than `max_erroneous_period`
    #[error("Subscription '{name}' was unavailable for longer than {period:?}: {last}")]
    ErroneousPeriodExceeded {
        name: String,
        period: Duration,
        #[source]
        last: Box<Error>,
    },
}

/// Failure raised by the user batch callback
///
/// Keeps the original error as [`std::error::Error::source`] so callers can
/// tell application failures apart from infrastructure failures.
#[derive(Debug, thiserror::Error)]
#[error("Subscriber error in subscription '{subscription_name}': {source}")]
pub struct SubscriberError {
    pub subscription_name: String,
    /// Change vector of the last item of the failed batch
    pub last_change_vector: Option<ChangeVector>,
    #[source]
    pub source: BoxError,
}

impl SubscriberError {
    pub fn new(
        subscription_name: impl Into<String>,
        last_change_vector: Option<ChangeVector>,
        source: BoxError,
    ) -> Self {
        Self {
            subscription_name: subscription_name.into(),
            last_change_vector,
            source,
        }
    }

    /// Downcast the original callback error
    pub fn cause<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Persistent connection failures
    #[error("Socket connect failed: {0}")]
    ConnectError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Stream ended or broke mid-conversation
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Malformed server addresses
    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// Endpoint unavailable (HTTP 503 equivalent)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The server refused a batch acknowledgment
    #[error("Acknowledgment of '{change_vector}' rejected: {reason}")]
    AckRejected { change_vector: String, reason: String },

    /// Retry policy exhaustion
    #[error("Retry timeout after {0:?}")]
    RetryTimeoutError(Duration),

    #[error("{0}")]
    RetryTaskFailed(String),

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unexpected frame: expected {expected}, got {actual}")]
    UnexpectedFrame {
        expected: &'static str,
        actual: String,
    },

    #[error("Invalid change vector '{0}'")]
    InvalidChangeVector(String),

    #[error("Failed to decode document '{key}': {source}")]
    DocumentDecode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Subscription(e) => e.kind(),
            Error::Subscriber(_) => ErrorKind::Subscriber,
            Error::Network(_) => ErrorKind::Transient,
            Error::Protocol(ProtocolError::DocumentDecode { .. })
            | Error::Protocol(ProtocolError::InvalidChangeVector(_)) => ErrorKind::Fatal,
            Error::Protocol(_) => ErrorKind::Transient,
            Error::Config(_) | Error::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the reconnect policy should be consulted for this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectionInUse | ErrorKind::Transient
        )
    }
}

impl SubscriptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubscriptionError::InUse { .. } => ErrorKind::ConnectionInUse,
            SubscriptionError::Closed { .. } => ErrorKind::Closed,
            _ => ErrorKind::Fatal,
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(err)).into()
    }
}

impl From<Status> for Error {
    /// Maps gRPC status codes onto the subscription error taxonomy
    ///
    /// The server puts the subscription (or database) name in the status
    /// message for the not-found family of codes.
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::Unavailable => NetworkError::ServiceUnavailable(message).into(),
            Code::DeadlineExceeded => NetworkError::ConnectionLost(format!("deadline exceeded: {message}")).into(),
            Code::Cancelled | Code::Aborted | Code::Unknown => NetworkError::ConnectionLost(message).into(),

            Code::NotFound => SubscriptionError::SubscriptionDoesNotExist { name: message }.into(),

            Code::PermissionDenied | Code::Unauthenticated => SubscriptionError::Authorization(message).into(),

            Code::FailedPrecondition => SubscriptionError::InvalidState {
                name: String::new(),
                reason: message,
            }
            .into(),

            Code::ResourceExhausted => SubscriptionError::InUse { name: message }.into(),

            Code::AlreadyExists => SubscriptionError::AlreadyExists { name: message }.into(),

            Code::InvalidArgument => SubscriptionError::InvalidDefinition(message).into(),

            Code::Internal | Code::DataLoss => ProtocolError::InvalidResponse(message).into(),

            code => Error::Fatal(format!("Unhandled status code {code:?}: {message}")),
        }
    }
}
