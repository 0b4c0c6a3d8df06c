//! # Remlink SASL
//!
//! Challenge/response mechanism negotiation for remlink connections.
//! Mechanisms are selected by name from a [`MechanismRegistry`]; the
//! application supplies credentials through a [`CredentialCallback`].

#![warn(missing_docs)]

/// Credential prompts and callback handlers
pub mod callback;

/// Mechanism traits
pub mod mechanism;

/// Negotiation properties and mechanism policy
pub mod properties;

/// Mechanism selection
pub mod registry;

/// The PLAIN mechanism
pub mod plain;

/// The ANONYMOUS mechanism
pub mod anonymous;

/// Error types for mechanism negotiation
pub mod error;

pub use callback::{Callback, ClientCredentials, CredentialCallback, NoCredentials, PasswordDatabase};
pub use error::SaslError;
pub use mechanism::{ClientRequest, MechanismFactory, SaslClient, SaslServer, ServerRequest};
pub use properties::{MechanismPolicy, PropertyMap};
pub use registry::MechanismRegistry;

/// Result type alias for mechanism operations
pub type Result<T> = std::result::Result<T, SaslError>;
