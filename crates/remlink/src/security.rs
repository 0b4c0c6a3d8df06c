//! Negotiated security context
//!
//! Produced once per connection when authentication completes. It keeps the
//! finished mechanism so that a security layer, if one was negotiated, can
//! protect later traffic.

use crate::{RemlinkError, Result};
use bytes::Buf;
use parking_lot::Mutex;
use remlink_sasl::properties::QOP;
use remlink_sasl::{SaslClient, SaslServer};
use std::fmt;

enum Mechanism {
    Client(Box<dyn SaslClient>),
    Server(Box<dyn SaslServer>),
}

impl Mechanism {
    fn wrap(&mut self, outgoing: &[u8]) -> remlink_sasl::Result<Vec<u8>> {
        match self {
            Self::Client(client) => client.wrap(outgoing),
            Self::Server(server) => server.wrap(outgoing),
        }
    }

    fn unwrap(&mut self, incoming: &[u8]) -> remlink_sasl::Result<Vec<u8>> {
        match self {
            Self::Client(client) => client.unwrap(incoming),
            Self::Server(server) => server.unwrap(incoming),
        }
    }

    fn negotiated_property(&self, name: &str) -> Option<String> {
        match self {
            Self::Client(client) => client.negotiated_property(name),
            Self::Server(server) => server.negotiated_property(name),
        }
    }
}

/// Outcome of a completed mechanism exchange
pub struct SecurityContext {
    mechanism_name: String,
    authorization_id: Option<String>,
    mechanism: Mutex<Mechanism>,
}

impl SecurityContext {
    pub(crate) fn client(client: Box<dyn SaslClient>) -> Self {
        Self {
            mechanism_name: client.mechanism_name().to_string(),
            authorization_id: None,
            mechanism: Mutex::new(Mechanism::Client(client)),
        }
    }

    pub(crate) fn server(server: Box<dyn SaslServer>) -> Self {
        Self {
            mechanism_name: server.mechanism_name().to_string(),
            authorization_id: server.authorization_id().map(str::to_owned),
            mechanism: Mutex::new(Mechanism::Server(server)),
        }
    }

    /// Name of the mechanism that authenticated the connection
    pub fn mechanism_name(&self) -> &str {
        &self.mechanism_name
    }

    /// Identity the peer was authorized as; only known on the server side
    pub fn authorization_id(&self) -> Option<&str> {
        self.authorization_id.as_deref()
    }

    /// Property negotiated by the mechanism
    pub fn negotiated_property(&self, name: &str) -> Option<String> {
        self.mechanism.lock().negotiated_property(name)
    }

    /// Negotiated quality of protection
    pub fn qop(&self) -> Option<String> {
        self.negotiated_property(QOP)
    }

    /// Protect outgoing data
    pub fn wrap(&self, outgoing: &[u8]) -> Result<Vec<u8>> {
        self.mechanism.lock().wrap(outgoing).map_err(RemlinkError::from)
    }

    /// Verify and strip protection from incoming data, consuming it
    ///
    /// A buffer whose bytes are contiguous is handed to the mechanism where
    /// it lies; a chained buffer is first gathered into one slice. Both give
    /// the same result for the same bytes.
    pub fn unwrap<B: Buf>(&self, mut incoming: B) -> Result<Vec<u8>> {
        let len = incoming.remaining();
        let result = if incoming.chunk().len() == len {
            let unwrapped = self.mechanism.lock().unwrap(incoming.chunk());
            incoming.advance(len);
            unwrapped
        } else {
            let mut gathered = vec![0u8; len];
            incoming.copy_to_slice(&mut gathered);
            self.mechanism.lock().unwrap(&gathered)
        };
        result.map_err(RemlinkError::from)
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("mechanism", &self.mechanism_name)
            .field("authorization_id", &self.authorization_id)
            .finish()
    }
}
