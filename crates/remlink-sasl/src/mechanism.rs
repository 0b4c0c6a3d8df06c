//! Mechanism traits

use crate::{CredentialCallback, MechanismPolicy, PropertyMap, Result, SaslError};
use std::sync::Arc;

/// Client side of one mechanism exchange
pub trait SaslClient: Send {
    /// Registered mechanism name
    fn mechanism_name(&self) -> &str;

    /// Produce the response to a server challenge
    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Whether the exchange has finished on this side
    fn is_complete(&self) -> bool;

    /// Property negotiated during the exchange
    fn negotiated_property(&self, _name: &str) -> Option<String> {
        None
    }

    /// Protect outgoing data with the negotiated security layer
    fn wrap(&mut self, _outgoing: &[u8]) -> Result<Vec<u8>> {
        Err(SaslError::NoSecurityLayer)
    }

    /// Verify and strip the negotiated security layer from incoming data
    fn unwrap(&mut self, _incoming: &[u8]) -> Result<Vec<u8>> {
        Err(SaslError::NoSecurityLayer)
    }
}

/// Server side of one mechanism exchange
pub trait SaslServer: Send {
    /// Registered mechanism name
    fn mechanism_name(&self) -> &str;

    /// Consume a client response and produce the next challenge
    ///
    /// After the exchange completes the returned bytes are the final data
    /// carried by the completion message, usually empty.
    fn evaluate_response(&mut self, response: &[u8]) -> Result<Vec<u8>>;

    /// Whether the exchange has finished on this side
    fn is_complete(&self) -> bool;

    /// Identity the client is authorized as, once complete
    fn authorization_id(&self) -> Option<&str>;

    /// Property negotiated during the exchange
    fn negotiated_property(&self, _name: &str) -> Option<String> {
        None
    }

    /// Protect outgoing data with the negotiated security layer
    fn wrap(&mut self, _outgoing: &[u8]) -> Result<Vec<u8>> {
        Err(SaslError::NoSecurityLayer)
    }

    /// Verify and strip the negotiated security layer from incoming data
    fn unwrap(&mut self, _incoming: &[u8]) -> Result<Vec<u8>> {
        Err(SaslError::NoSecurityLayer)
    }
}

/// Everything a factory needs to build a client mechanism
#[derive(Clone)]
pub struct ClientRequest<'a> {
    /// Identity to authenticate as
    pub username: &'a str,
    /// Protocol (service) name
    pub protocol: &'a str,
    /// Host name of the server
    pub server_name: &'a str,
    /// Negotiation properties
    pub properties: &'a PropertyMap,
    /// Mechanism policy
    pub policy: &'a MechanismPolicy,
    /// Credential prompts
    pub callback: Arc<dyn CredentialCallback>,
}

/// Everything a factory needs to build a server mechanism
#[derive(Clone)]
pub struct ServerRequest<'a> {
    /// Protocol (service) name
    pub protocol: &'a str,
    /// Local server name
    pub server_name: &'a str,
    /// Negotiation properties
    pub properties: &'a PropertyMap,
    /// Mechanism policy
    pub policy: &'a MechanismPolicy,
    /// Credential verification hooks
    pub callback: Arc<dyn CredentialCallback>,
}

/// Builds mechanism instances for one mechanism name
pub trait MechanismFactory: Send + Sync {
    /// Mechanism name as it appears in greetings
    fn name(&self) -> &str;

    /// Mechanism admits unauthenticated peers
    fn is_anonymous(&self) -> bool {
        false
    }

    /// Mechanism sends secrets without protection
    fn is_plaintext(&self) -> bool {
        false
    }

    /// Build the client half
    fn create_client(&self, request: &ClientRequest<'_>) -> Result<Box<dyn SaslClient>>;

    /// Build the server half
    fn create_server(&self, request: &ServerRequest<'_>) -> Result<Box<dyn SaslServer>>;
}
