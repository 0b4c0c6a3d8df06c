//! Mechanism registry
//!
//! Holds the mechanisms an endpoint knows, in preference order, and applies
//! the connection's policy when offering or selecting one.

use crate::anonymous::AnonymousFactory;
use crate::mechanism::{ClientRequest, MechanismFactory, SaslClient, SaslServer, ServerRequest};
use crate::plain::PlainFactory;
use crate::{MechanismPolicy, Result, SaslError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Ordered set of mechanism factories
#[derive(Clone, Default)]
pub struct MechanismRegistry {
    factories: Vec<Arc<dyn MechanismFactory>>,
}

impl MechanismRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in mechanisms, PLAIN preferred over ANONYMOUS
    pub fn with_defaults() -> Self {
        Self::new().with(PlainFactory).with(AnonymousFactory)
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, factory: impl MechanismFactory + 'static) -> Self {
        self.register(Arc::new(factory));
        self
    }

    /// Add a factory, replacing any registered under the same name
    pub fn register(&mut self, factory: Arc<dyn MechanismFactory>) {
        match self
            .factories
            .iter()
            .position(|f| f.name().eq_ignore_ascii_case(factory.name()))
        {
            Some(index) => self.factories[index] = factory,
            None => self.factories.push(factory),
        }
    }

    /// Registered names in preference order
    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// Look up a factory by name, ignoring case
    pub fn get(&self, name: &str) -> Option<&Arc<dyn MechanismFactory>> {
        self.factories.iter().find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Mechanisms a server offers under a policy
    pub fn server_mechanisms(&self, policy: &MechanismPolicy) -> Vec<String> {
        self.factories
            .iter()
            .filter(|f| policy.permits(f.as_ref()))
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Pick the first offered mechanism this side supports and build its client
    ///
    /// Offer order wins: the server lists mechanisms in its preference order.
    pub fn select_client(&self, offered: &[String], request: &ClientRequest<'_>) -> Result<Box<dyn SaslClient>> {
        for name in offered {
            let Some(factory) = self.get(name) else {
                trace!("Skipping unregistered mechanism {}", name);
                continue;
            };
            if !request.policy.permits(factory.as_ref()) {
                trace!("Skipping mechanism {} excluded by policy", name);
                continue;
            }
            debug!("Selected mechanism {}", factory.name());
            return factory.create_client(request);
        }
        Err(SaslError::NoMechanism {
            offered: offered.to_vec(),
        })
    }

    /// Build the server half of a mechanism the client asked for
    pub fn create_server(&self, name: &str, request: &ServerRequest<'_>) -> Result<Box<dyn SaslServer>> {
        let factory = self
            .get(name)
            .ok_or_else(|| SaslError::UnknownMechanism(name.to_string()))?;
        if !request.policy.permits(factory.as_ref()) {
            return Err(SaslError::MechanismNotPermitted(name.to_string()));
        }
        factory.create_server(request)
    }
}

impl fmt::Debug for MechanismRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MechanismRegistry")
            .field("mechanisms", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoCredentials, PropertyMap};

    struct FailingFactory;

    impl MechanismFactory for FailingFactory {
        fn name(&self) -> &str {
            "BROKEN"
        }

        fn create_client(&self, _request: &ClientRequest<'_>) -> Result<Box<dyn SaslClient>> {
            Err(SaslError::Callback("cannot build".to_string()))
        }

        fn create_server(&self, _request: &ServerRequest<'_>) -> Result<Box<dyn SaslServer>> {
            Err(SaslError::Callback("cannot build".to_string()))
        }
    }

    fn offered(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn select(registry: &MechanismRegistry, names: &[&str], policy: &MechanismPolicy) -> Result<Box<dyn SaslClient>> {
        let properties = PropertyMap::new();
        registry.select_client(
            &offered(names),
            &ClientRequest {
                username: "anonymous",
                protocol: "remote",
                server_name: "localhost",
                properties: &properties,
                policy,
                callback: Arc::new(NoCredentials),
            },
        )
    }

    #[test]
    fn test_default_order() {
        let registry = MechanismRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["PLAIN", "ANONYMOUS"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = MechanismRegistry::with_defaults();
        registry.register(Arc::new(PlainFactory));
        assert_eq!(registry.names().len(), 2);
    }

    #[test]
    fn test_server_mechanisms_respect_policy() {
        let registry = MechanismRegistry::with_defaults();
        let policy = MechanismPolicy {
            no_plaintext: true,
            ..Default::default()
        };
        assert_eq!(registry.server_mechanisms(&policy), vec!["ANONYMOUS"]);
        assert_eq!(
            registry.server_mechanisms(&MechanismPolicy::default()),
            vec!["PLAIN", "ANONYMOUS"]
        );
    }

    #[test]
    fn test_select_follows_offer_order() {
        let registry = MechanismRegistry::with_defaults();
        let client = select(&registry, &["UNKNOWN", "anonymous", "PLAIN"], &MechanismPolicy::default()).unwrap();
        assert_eq!(client.mechanism_name(), "ANONYMOUS");
    }

    #[test]
    fn test_select_skips_excluded() {
        let registry = MechanismRegistry::with_defaults();
        let policy = MechanismPolicy {
            no_plaintext: true,
            ..Default::default()
        };
        let client = select(&registry, &["PLAIN", "ANONYMOUS"], &policy).unwrap();
        assert_eq!(client.mechanism_name(), "ANONYMOUS");
    }

    #[test]
    fn test_select_nothing_usable() {
        let registry = MechanismRegistry::with_defaults();
        match select(&registry, &[], &MechanismPolicy::default()) {
            Err(SaslError::NoMechanism { offered }) => assert!(offered.is_empty()),
            other => panic!("unexpected result: {:?}", other.map(|c| c.mechanism_name().to_string())),
        }
    }

    #[test]
    fn test_select_propagates_construction_error() {
        let registry = MechanismRegistry::new().with(FailingFactory).with(PlainFactory);
        assert!(matches!(
            select(&registry, &["BROKEN", "PLAIN"], &MechanismPolicy::default()),
            Err(SaslError::Callback(_))
        ));
    }

    #[test]
    fn test_create_server_errors() {
        let registry = MechanismRegistry::with_defaults();
        let properties = PropertyMap::new();
        let policy = MechanismPolicy {
            no_anonymous: true,
            ..Default::default()
        };
        let request = ServerRequest {
            protocol: "remote",
            server_name: "localhost",
            properties: &properties,
            policy: &policy,
            callback: Arc::new(NoCredentials),
        };
        assert!(matches!(
            registry.create_server("CRAM-MD5", &request),
            Err(SaslError::UnknownMechanism(_))
        ));
        assert!(matches!(
            registry.create_server("ANONYMOUS", &request),
            Err(SaslError::MechanismNotPermitted(_))
        ));
        assert!(registry.create_server("plain", &request).is_ok());
    }
}
