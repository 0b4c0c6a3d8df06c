//! # Remlink Agent
//!
//! A small server that accepts remlink connections, authenticates clients
//! against a configured user table and serves a few demo services.

#![warn(missing_docs)]

/// Agent configuration
pub mod config;

/// Demo service handlers
pub mod handlers;

/// Listener loop
pub mod server;

pub use config::AgentConfig;
pub use server::Agent;
