//! Error types for connections

use remlink_proto::ProtocolError;
use remlink_sasl::SaslError;
use thiserror::Error;

/// Main error type for connection operations
#[derive(Debug, Error)]
pub enum RemlinkError {
    /// Peer sent a frame that is malformed or not valid in the current phase
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// No mechanism could be agreed on, or the mechanism exchange failed
    #[error("Negotiation failure: {0}")]
    NegotiationFailure(String),

    /// The peer refused our credentials, or we refused the peer's
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// I/O errors on the transport
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Stream ended before the handshake finished
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Connection was closed while the operation was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// A handle with this id is already open
    #[error("Duplicate handle id: {0}")]
    DuplicateHandle(u32),

    /// Peer has no service with this name
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Remote request handler failed
    #[error("Remote exception: {0}")]
    RemoteException(String),

    /// Client handle has been closed
    #[error("Client {0} is closed")]
    ClientClosed(u32),

    /// Security layer operation failed
    #[error("Security layer error: {0}")]
    Security(String),

    /// Handshake outcome was resolved more than once
    #[error("Outcome already resolved")]
    OutcomeAlreadyResolved,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RemlinkError {
    /// Wrap a mechanism error as a negotiation failure
    pub fn negotiation(err: impl std::fmt::Display) -> Self {
        Self::NegotiationFailure(err.to_string())
    }

    /// Whether this error ended the connection rather than one operation
    ///
    /// A full send queue is back-pressure on one frame, not a broken transport.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ServiceNotFound(_) | Self::RemoteException(_) | Self::ClientClosed(_) | Self::Security(_) => false,
            Self::Transport(e) => e.kind() != std::io::ErrorKind::WouldBlock,
            _ => true,
        }
    }
}

impl From<ProtocolError> for RemlinkError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Transport(e),
            ProtocolError::TruncatedFrame(_) => Self::UnexpectedEof,
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<SaslError> for RemlinkError {
    fn from(err: SaslError) -> Self {
        match err {
            SaslError::AuthenticationFailed(msg) => Self::AuthenticationRejected(msg),
            SaslError::NoSecurityLayer | SaslError::NotComplete => Self::Security(err.to_string()),
            other => Self::NegotiationFailure(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RemlinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {}", err))
    }
}
