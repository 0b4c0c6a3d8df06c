//! Connection options
//!
//! Options are plain data so they can be loaded from JSON alongside the rest
//! of an application's configuration. Every field has a default; a JSON file
//! only needs to name what it changes.

use crate::{RemlinkError, Result};
use remlink_proto::MAX_FRAME_SIZE;
use remlink_sasl::properties::{POLICY_NOANONYMOUS, POLICY_NOPLAINTEXT};
use remlink_sasl::{MechanismPolicy, PropertyMap};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Username used when none is configured
pub const DEFAULT_USERNAME: &str = "anonymous";

/// Protocol name handed to mechanisms
pub const SERVICE_NAME: &str = "remote";

/// Per-connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Identity the client authenticates as
    pub auth_username: Option<String>,
    /// Name this endpoint announces in its greeting
    pub endpoint_name: Option<String>,
    /// Host name handed to mechanisms instead of the peer's address
    pub peer_host_override: Option<String>,
    /// Refuse anonymous mechanisms
    pub sasl_policy_noanonymous: bool,
    /// Refuse mechanisms that send secrets in the clear
    pub sasl_policy_noplaintext: bool,
    /// If set, only these mechanisms may be used
    pub sasl_allowed_mechanisms: Option<Vec<String>>,
    /// Mechanisms that may never be used
    pub sasl_disallowed_mechanisms: Vec<String>,
    /// Extra properties passed to mechanisms
    pub sasl_properties: PropertyMap,
    /// Largest message accepted or sent
    pub max_frame_size: usize,
    /// Initial capacity of outbound buffers
    pub buffer_size: usize,
    /// Number of freed buffers kept for reuse
    pub buffer_pool_capacity: usize,
    /// Outbound frames queued before `send` reports `WouldBlock`
    pub send_queue_depth: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auth_username: None,
            endpoint_name: None,
            peer_host_override: None,
            sasl_policy_noanonymous: false,
            sasl_policy_noplaintext: false,
            sasl_allowed_mechanisms: None,
            sasl_disallowed_mechanisms: Vec::new(),
            sasl_properties: PropertyMap::new(),
            max_frame_size: MAX_FRAME_SIZE,
            buffer_size: 8192,
            buffer_pool_capacity: 16,
            send_queue_depth: 64,
        }
    }
}

impl ConnectionOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RemlinkError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Check that sizes are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(RemlinkError::Config("max_frame_size must be positive".to_string()));
        }
        if self.send_queue_depth == 0 {
            return Err(RemlinkError::Config("send_queue_depth must be positive".to_string()));
        }
        Ok(())
    }

    /// Set the client username
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.auth_username = Some(username.into());
        self
    }

    /// Set the announced endpoint name
    pub fn with_endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = Some(name.into());
        self
    }

    /// Override the host name handed to mechanisms
    pub fn with_peer_host(mut self, host: impl Into<String>) -> Self {
        self.peer_host_override = Some(host.into());
        self
    }

    /// Refuse or admit anonymous mechanisms
    pub fn with_no_anonymous(mut self, no_anonymous: bool) -> Self {
        self.sasl_policy_noanonymous = no_anonymous;
        self
    }

    /// Refuse or admit plaintext mechanisms
    pub fn with_no_plaintext(mut self, no_plaintext: bool) -> Self {
        self.sasl_policy_noplaintext = no_plaintext;
        self
    }

    /// Restrict mechanisms to a fixed list
    pub fn with_allowed_mechanisms<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sasl_allowed_mechanisms = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Never use a mechanism
    pub fn with_disallowed_mechanism(mut self, name: impl Into<String>) -> Self {
        self.sasl_disallowed_mechanisms.push(name.into());
        self
    }

    /// Add a mechanism property
    pub fn with_sasl_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.sasl_properties.insert(key.into(), value.into());
        self
    }

    /// Set the maximum message size
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the outbound queue depth
    pub fn with_send_queue_depth(mut self, depth: usize) -> Self {
        self.send_queue_depth = depth;
        self
    }

    /// Username to authenticate as
    pub fn username(&self) -> &str {
        self.auth_username.as_deref().unwrap_or(DEFAULT_USERNAME)
    }

    /// Properties handed to mechanisms, policy flags included
    pub fn sasl_properties(&self) -> PropertyMap {
        let mut properties = self.sasl_properties.clone();
        if self.sasl_policy_noanonymous {
            properties.insert(POLICY_NOANONYMOUS.to_string(), "true".to_string());
        }
        if self.sasl_policy_noplaintext {
            properties.insert(POLICY_NOPLAINTEXT.to_string(), "true".to_string());
        }
        properties
    }

    /// Mechanism policy for this connection
    pub fn mechanism_policy(&self) -> MechanismPolicy {
        MechanismPolicy {
            allowed: self.sasl_allowed_mechanisms.clone(),
            disallowed: self.sasl_disallowed_mechanisms.clone(),
            ..MechanismPolicy::from_properties(&self.sasl_properties())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.username(), "anonymous");
        assert_eq!(options.max_frame_size, MAX_FRAME_SIZE);
        assert!(options.sasl_properties().is_empty());
        assert_eq!(options.mechanism_policy(), MechanismPolicy::default());
    }

    #[test]
    fn test_policy_from_flags() {
        let options = ConnectionOptions::new()
            .with_no_plaintext(true)
            .with_sasl_property(POLICY_NOANONYMOUS, "TRUE")
            .with_disallowed_mechanism("CRAM-MD5");
        let policy = options.mechanism_policy();
        assert!(policy.no_plaintext);
        assert!(policy.no_anonymous);
        assert_eq!(policy.disallowed, vec!["CRAM-MD5".to_string()]);
        assert_eq!(
            options.sasl_properties().get(POLICY_NOPLAINTEXT).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_from_json_partial() {
        let options = ConnectionOptions::from_json_str(
            r#"{ "auth_username": "alice", "sasl_allowed_mechanisms": ["PLAIN"] }"#,
        )
        .unwrap();
        assert_eq!(options.username(), "alice");
        assert_eq!(options.sasl_allowed_mechanisms, Some(vec!["PLAIN".to_string()]));
        assert_eq!(options.send_queue_depth, 64);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            ConnectionOptions::from_json_str("{ not json"),
            Err(RemlinkError::Config(_))
        ));
        assert!(matches!(
            ConnectionOptions::from_json_str(r#"{ "send_queue_depth": 0 }"#),
            Err(RemlinkError::Config(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "endpoint_name": "agent-1", "sasl_policy_noanonymous": true }}"#).unwrap();

        let options = ConnectionOptions::from_json_file(file.path()).unwrap();
        assert_eq!(options.endpoint_name.as_deref(), Some("agent-1"));
        assert!(options.mechanism_policy().no_anonymous);

        assert!(matches!(
            ConnectionOptions::from_json_file("/nonexistent/remlink.json"),
            Err(RemlinkError::Config(_))
        ));
    }
}
