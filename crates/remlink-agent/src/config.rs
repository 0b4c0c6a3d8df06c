//! Agent configuration
//!
//! Loaded from a JSON file named on the command line or by the
//! `REMLINK_AGENT_CONFIG` environment variable. Every field has a default, so
//! an empty object is a valid configuration.

use anyhow::{Context, Result};
use remlink::ConnectionOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "REMLINK_AGENT_CONFIG";

/// Address the agent listens on by default
pub const DEFAULT_LISTEN: &str = "127.0.0.1:7777";

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Socket address to listen on
    pub listen: String,
    /// Accepted users and their passwords
    pub users: HashMap<String, String>,
    /// Options applied to every accepted connection
    pub connection: ConnectionOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            users: HashMap::new(),
            connection: ConnectionOptions::default(),
        }
    }
}

impl AgentConfig {
    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid agent configuration")?;
        config.connection.validate()?;
        Ok(config)
    }

    /// Read a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Configuration file chosen by the first argument or the environment
    pub fn locate(mut args: impl Iterator<Item = String>) -> Option<PathBuf> {
        args.next()
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .map(PathBuf::from)
    }

    /// Load the located configuration, or fall back to defaults
    pub fn from_args(args: impl Iterator<Item = String>) -> Result<Self> {
        match Self::locate(args) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
