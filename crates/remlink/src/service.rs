//! Local services and request handlers
//!
//! A service is a named factory. When the peer opens a handle to a service
//! the factory produces the [`RequestHandler`] bound to that handle.

use crate::handle::LocalEndpoint;
use crate::security::SecurityContext;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Serves requests arriving on one handle
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request and produce the reply payload
    ///
    /// An error is sent back to the caller as a remote exception.
    async fn handle_request(&self, payload: Bytes, endpoint: &LocalEndpoint) -> Result<Bytes>;
}

/// Produces a handler each time a handle to the service is opened
pub trait ServiceFactory: Send + Sync {
    /// Open the service for an authenticated peer
    fn open(&self, security: &SecurityContext) -> Result<Arc<dyn RequestHandler>>;
}

impl<F> ServiceFactory for F
where
    F: Fn(&SecurityContext) -> Result<Arc<dyn RequestHandler>> + Send + Sync,
{
    fn open(&self, security: &SecurityContext) -> Result<Arc<dyn RequestHandler>> {
        self(security)
    }
}

struct Shared(Arc<dyn RequestHandler>);

impl ServiceFactory for Shared {
    fn open(&self, _security: &SecurityContext) -> Result<Arc<dyn RequestHandler>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Services a connection offers, by name
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn ServiceFactory>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a name, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn ServiceFactory>) {
        self.services.insert(name.into(), factory);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_service(mut self, name: impl Into<String>, factory: impl ServiceFactory + 'static) -> Self {
        self.register(name, Arc::new(factory));
        self
    }

    /// Register one handler shared by every handle to the service
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        self.register(name, Arc::new(Shared(handler)));
        self
    }

    /// Look up a service
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ServiceFactory>> {
        self.services.get(name)
    }

    /// Registered service names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services are registered
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
