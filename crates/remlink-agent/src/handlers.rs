//! Demo service handlers

use async_trait::async_trait;
use bytes::Bytes;
use remlink::{LocalEndpoint, RemlinkError, RequestHandler, SecurityContext, ServiceRegistry};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Applies ROT13 to ASCII letters
pub struct Rot13Handler;

#[async_trait]
impl RequestHandler for Rot13Handler {
    async fn handle_request(&self, payload: Bytes, endpoint: &LocalEndpoint) -> remlink::Result<Bytes> {
        debug!("{}: {} bytes", endpoint.service(), payload.len());
        Ok(payload.iter().map(|b| rot13(*b)).collect::<Vec<u8>>().into())
    }
}

fn rot13(b: u8) -> u8 {
    match b {
        b'a'..=b'z' => (b - b'a' + 13) % 26 + b'a',
        b'A'..=b'Z' => (b - b'A' + 13) % 26 + b'A',
        _ => b,
    }
}

/// Answers every request with the current Unix time in milliseconds
pub struct PingHandler;

#[async_trait]
impl RequestHandler for PingHandler {
    async fn handle_request(&self, _payload: Bytes, _endpoint: &LocalEndpoint) -> remlink::Result<Bytes> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RemlinkError::RemoteException(e.to_string()))?
            .as_millis();
        Ok(Bytes::from(millis.to_string()))
    }
}

/// Replies with the identity the connection authenticated as
pub struct WhoAmIHandler {
    identity: String,
}

#[async_trait]
impl RequestHandler for WhoAmIHandler {
    async fn handle_request(&self, _payload: Bytes, _endpoint: &LocalEndpoint) -> remlink::Result<Bytes> {
        Ok(Bytes::from(self.identity.clone()))
    }
}

fn open_whoami(security: &SecurityContext) -> remlink::Result<Arc<dyn RequestHandler>> {
    let identity = security
        .authorization_id()
        .ok_or_else(|| RemlinkError::Security("connection has no authorization identity".to_string()))?;
    Ok(Arc::new(WhoAmIHandler {
        identity: identity.to_string(),
    }))
}

/// Services every agent connection offers
pub fn services() -> ServiceRegistry {
    ServiceRegistry::new()
        .with_handler("rot13", Arc::new(Rot13Handler))
        .with_handler("ping", Arc::new(PingHandler))
        .with_service("whoami", open_whoami)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(service: &str, handler: Arc<dyn RequestHandler>) -> LocalEndpoint {
        LocalEndpoint::new(service, handler)
    }

    #[tokio::test]
    async fn test_rot13() {
        let handler: Arc<dyn RequestHandler> = Arc::new(Rot13Handler);
        let endpoint = endpoint("rot13", handler.clone());
        let reply = handler
            .handle_request(Bytes::from_static(b"Hello, World!"), &endpoint)
            .await
            .unwrap();
        assert_eq!(&reply[..], b"Uryyb, Jbeyq!");

        let back = handler.handle_request(reply, &endpoint).await.unwrap();
        assert_eq!(&back[..], b"Hello, World!");
    }

    #[test]
    fn test_ping_returns_number() {
        let handler: Arc<dyn RequestHandler> = Arc::new(PingHandler);
        let endpoint = endpoint("ping", handler.clone());
        let reply = tokio_test::block_on(handler.handle_request(Bytes::new(), &endpoint)).unwrap();
        let millis: u128 = std::str::from_utf8(&reply).unwrap().parse().unwrap();
        assert!(millis > 0);
    }

    #[test]
    fn test_registry_names() {
        assert_eq!(services().names(), vec!["ping", "rot13", "whoami"]);
    }
}
