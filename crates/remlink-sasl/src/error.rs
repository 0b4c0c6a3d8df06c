//! Error types for mechanism negotiation

use thiserror::Error;

/// Mechanism negotiation errors
#[derive(Debug, Error)]
pub enum SaslError {
    /// None of the offered mechanisms is registered and permitted
    #[error("No usable mechanism among {offered:?}")]
    NoMechanism {
        /// Mechanisms the peer offered
        offered: Vec<String>,
    },

    /// Mechanism name is not registered
    #[error("Unknown mechanism: {0}")]
    UnknownMechanism(String),

    /// Mechanism is registered but excluded by policy
    #[error("Mechanism not permitted by policy: {0}")]
    MechanismNotPermitted(String),

    /// Callback handler does not support a required prompt
    #[error("Unsupported callback: {0}")]
    UnsupportedCallback(&'static str),

    /// Callback handler failed or left a prompt unanswered
    #[error("Callback failed: {0}")]
    Callback(String),

    /// Credentials were checked and refused
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Peer sent a message the mechanism cannot parse
    #[error("Malformed mechanism message: {0}")]
    Malformed(String),

    /// Mechanism was asked to continue after completing
    #[error("Mechanism exchange already complete")]
    AlreadyComplete,

    /// Operation requires a completed exchange
    #[error("Mechanism exchange not complete")]
    NotComplete,

    /// Mechanism did not negotiate integrity or confidentiality protection
    #[error("No security layer negotiated")]
    NoSecurityLayer,
}
