//! Error types for control plane clients.

use thiserror::Error;
use tonic::Status;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Broad classes of client failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The RPC could not complete: connectivity or a server error status.
    Transport,
    /// A call was made before the state it requires exists.
    ProtocolPrecondition,
    /// The reservation's time bound has passed.
    ExpiryViolation,
    /// Caller-supplied input was rejected before any RPC.
    InvalidInput,
}

/// Errors that can occur while talking to the control plane.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("registration failed: {}", .0.message())]
    RegistrationFailed(Status),

    #[error("state update failed: {}", .0.message())]
    StateUpdateFailed(Status),

    #[error("deregistration failed: {}", .0.message())]
    DeregistrationFailed(Status),

    #[error("reservation failed: {}", .0.message())]
    ReservationFailed(Status),

    #[error("free failed: {}", .0.message())]
    FreeFailed(Status),

    #[error("status query failed: {}", .0.message())]
    StatusFailed(Status),

    #[error("load balancer lookup failed: {}", .0.message())]
    LookupFailed(Status),

    #[error("backend {0} is not registered")]
    NotRegistered(String),

    #[error("load balancer {0} is not reserved")]
    NotReserved(String),

    #[error("reservation of {name} expired at {until} (epoch seconds)")]
    ReservationExpired { name: String, until: i64 },

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable address found for {0}")]
    NoAddress(String),

    #[error("invalid ejfat URI: {0}")]
    InvalidUri(String),

    #[error("invalid port range: {0} (must be a power of two between 1 and 16384)")]
    InvalidPortRange(u32),
}

impl ClientError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::RegistrationFailed(_)
            | ClientError::StateUpdateFailed(_)
            | ClientError::DeregistrationFailed(_)
            | ClientError::ReservationFailed(_)
            | ClientError::FreeFailed(_)
            | ClientError::StatusFailed(_)
            | ClientError::LookupFailed(_)
            | ClientError::Resolve { .. }
            | ClientError::NoAddress(_) => ErrorKind::Transport,
            ClientError::NotRegistered(_) | ClientError::NotReserved(_) => {
                ErrorKind::ProtocolPrecondition
            }
            ClientError::ReservationExpired { .. } => ErrorKind::ExpiryViolation,
            ClientError::InvalidUri(_)
            | ClientError::InvalidPortRange(_) => ErrorKind::InvalidInput,
        }
    }

    /// The gRPC status returned by the control plane, if any.
    pub fn status(&self) -> Option<&Status> {
        match self {
            ClientError::RegistrationFailed(s)
            | ClientError::StateUpdateFailed(s)
            | ClientError::DeregistrationFailed(s)
            | ClientError::ReservationFailed(s)
            | ClientError::FreeFailed(s)
            | ClientError::StatusFailed(s)
            | ClientError::LookupFailed(s) => Some(s),
            _ => None,
        }
    }
}
