//! Negotiation properties and mechanism policy

use crate::MechanismFactory;
use std::collections::BTreeMap;

/// String-keyed negotiation properties passed to mechanisms
pub type PropertyMap = BTreeMap<String, String>;

/// Quality of protection; `auth` means authentication only
pub const QOP: &str = "sasl.qop";

/// Exclude mechanisms that accept anonymous logins
pub const POLICY_NOANONYMOUS: &str = "sasl.policy.noanonymous";

/// Exclude mechanisms that send secrets in the clear
pub const POLICY_NOPLAINTEXT: &str = "sasl.policy.noplaintext";

/// QOP value for authentication without a security layer
pub const QOP_AUTH: &str = "auth";

/// Read a boolean property; anything but `true` (any case) is false
pub fn flag(properties: &PropertyMap, key: &str) -> bool {
    properties
        .get(key)
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

/// Which registered mechanisms may be used on a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MechanismPolicy {
    /// Refuse anonymous mechanisms
    pub no_anonymous: bool,
    /// Refuse plaintext mechanisms
    pub no_plaintext: bool,
    /// If set, only these mechanisms may be used
    pub allowed: Option<Vec<String>>,
    /// Mechanisms that may never be used
    pub disallowed: Vec<String>,
}

impl MechanismPolicy {
    /// Policy derived from the `sasl.policy.*` flags of a property map
    pub fn from_properties(properties: &PropertyMap) -> Self {
        Self {
            no_anonymous: flag(properties, POLICY_NOANONYMOUS),
            no_plaintext: flag(properties, POLICY_NOPLAINTEXT),
            ..Default::default()
        }
    }

    /// Whether the policy admits a mechanism
    pub fn permits(&self, factory: &dyn MechanismFactory) -> bool {
        let name = factory.name();
        if self.no_anonymous && factory.is_anonymous() {
            return false;
        }
        if self.no_plaintext && factory.is_plaintext() {
            return false;
        }
        if self.disallowed.iter().any(|d| d.eq_ignore_ascii_case(name)) {
            return false;
        }
        match &self.allowed {
            Some(allowed) => allowed.iter().any(|a| a.eq_ignore_ascii_case(name)),
            None => true,
        }
    }
}
