//! The ANONYMOUS mechanism
//!
//! The client sends an optional trace string (here its username) and the
//! server admits it without checking anything.

use crate::mechanism::{ClientRequest, MechanismFactory, SaslClient, SaslServer, ServerRequest};
use crate::properties::{QOP, QOP_AUTH};
use crate::{Result, SaslError};
use tracing::debug;

/// Mechanism name
pub const ANONYMOUS: &str = "ANONYMOUS";

/// Authorization identity granted to every anonymous peer
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Longest trace string accepted, in characters
pub const MAX_TRACE_CHARS: usize = 255;

/// Factory for ANONYMOUS clients and servers
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousFactory;

impl MechanismFactory for AnonymousFactory {
    fn name(&self) -> &str {
        ANONYMOUS
    }

    fn is_anonymous(&self) -> bool {
        true
    }

    fn create_client(&self, request: &ClientRequest<'_>) -> Result<Box<dyn SaslClient>> {
        Ok(Box::new(AnonymousClient {
            trace: request.username.chars().take(MAX_TRACE_CHARS).collect(),
            complete: false,
        }))
    }

    fn create_server(&self, _request: &ServerRequest<'_>) -> Result<Box<dyn SaslServer>> {
        Ok(Box::new(AnonymousServer { complete: false }))
    }
}

/// Client half of ANONYMOUS
pub struct AnonymousClient {
    trace: String,
    complete: bool,
}

impl SaslClient for AnonymousClient {
    fn mechanism_name(&self) -> &str {
        ANONYMOUS
    }

    fn evaluate_challenge(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        if self.complete {
            return Err(SaslError::AlreadyComplete);
        }
        self.complete = true;
        Ok(self.trace.as_bytes().to_vec())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn negotiated_property(&self, name: &str) -> Option<String> {
        (self.complete && name == QOP).then(|| QOP_AUTH.to_string())
    }
}

/// Server half of ANONYMOUS
pub struct AnonymousServer {
    complete: bool,
}

impl SaslServer for AnonymousServer {
    fn mechanism_name(&self) -> &str {
        ANONYMOUS
    }

    fn evaluate_response(&mut self, response: &[u8]) -> Result<Vec<u8>> {
        if self.complete {
            return Err(SaslError::AlreadyComplete);
        }
        let trace = std::str::from_utf8(response)
            .map_err(|_| SaslError::Malformed("trace is not UTF-8".to_string()))?;
        if trace.chars().count() > MAX_TRACE_CHARS {
            return Err(SaslError::Malformed(format!(
                "trace longer than {} characters",
                MAX_TRACE_CHARS
            )));
        }
        debug!("Anonymous login, trace {:?}", trace);
        self.complete = true;
        Ok(Vec::new())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn authorization_id(&self) -> Option<&str> {
        self.complete.then_some(ANONYMOUS_IDENTITY)
    }

    fn negotiated_property(&self, name: &str) -> Option<String> {
        (self.complete && name == QOP).then(|| QOP_AUTH.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MechanismPolicy, NoCredentials, PropertyMap};
    use std::sync::Arc;

    fn client(username: &str) -> Box<dyn SaslClient> {
        let properties = PropertyMap::new();
        let policy = MechanismPolicy::default();
        AnonymousFactory
            .create_client(&ClientRequest {
                username,
                protocol: "remote",
                server_name: "localhost",
                properties: &properties,
                policy: &policy,
                callback: Arc::new(NoCredentials),
            })
            .unwrap()
    }

    fn server() -> Box<dyn SaslServer> {
        let properties = PropertyMap::new();
        let policy = MechanismPolicy::default();
        AnonymousFactory
            .create_server(&ServerRequest {
                protocol: "remote",
                server_name: "localhost",
                properties: &properties,
                policy: &policy,
                callback: Arc::new(NoCredentials),
            })
            .unwrap()
    }

    #[test]
    fn test_exchange() {
        let mut client = client("guest");
        let mut server = server();
        assert!(server.authorization_id().is_none());

        let response = client.evaluate_challenge(&[]).unwrap();
        assert_eq!(response, b"guest".to_vec());
        assert!(client.is_complete());

        assert!(server.evaluate_response(&response).unwrap().is_empty());
        assert!(server.is_complete());
        assert_eq!(server.authorization_id(), Some("anonymous"));
        assert_eq!(server.negotiated_property(QOP).as_deref(), Some("auth"));
    }

    #[test]
    fn test_trace_truncated() {
        let long = "x".repeat(300);
        let mut client = client(&long);
        let response = client.evaluate_challenge(&[]).unwrap();
        assert_eq!(response.len(), MAX_TRACE_CHARS);
        assert!(server().evaluate_response(&response).is_ok());
    }

    #[test]
    fn test_server_rejects_long_trace() {
        let long = "y".repeat(MAX_TRACE_CHARS + 1);
        assert!(matches!(
            server().evaluate_response(long.as_bytes()),
            Err(SaslError::Malformed(_))
        ));
    }

    #[test]
    fn test_server_rejects_invalid_utf8() {
        assert!(matches!(
            server().evaluate_response(&[0xff, 0xfe]),
            Err(SaslError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_trace_accepted() {
        let mut server = server();
        server.evaluate_response(&[]).unwrap();
        assert!(matches!(server.evaluate_response(&[]), Err(SaslError::AlreadyComplete)));
    }
}
