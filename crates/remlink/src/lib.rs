//! # Remlink
//!
//! Authenticated, multiplexed remote-invocation connections.
//!
//! A connection starts with a greeting in which the server offers its
//! authentication mechanisms, runs a challenge/response exchange, and then
//! carries any number of service handles, each identified by a numeric id,
//! over the same transport.
//!
//! ```no_run
//! use remlink::{ConnectionBuilder, remlink_sasl::ClientCredentials};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> remlink::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:7777").await?;
//! let peer = stream.peer_addr()?;
//! let session = ConnectionBuilder::new()
//!     .with_username("alice")
//!     .with_credentials(ClientCredentials::password("wonderland"))
//!     .connect(stream, peer)
//!     .await?;
//!
//! let client = session.open_client("rot13").await?;
//! let reply = client.invoke("hello".into()).await?;
//! client.close();
//! session.close().await;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use remlink_proto;
pub use remlink_sasl;

/// Error types for connections
pub mod error;

/// Connection options
pub mod options;

/// Outbound buffer allocation
pub mod buffer;

/// Single-assignment handshake outcome
pub mod outcome;

/// Transport-level connection state
pub mod connection;

/// Negotiated security context
pub mod security;

/// Inbound handle tracking
pub mod handle;

/// Local services and request handlers
pub mod service;

/// Steady-state frame dispatch
pub mod dispatch;

/// Outbound service clients
pub mod client;

/// Connection setup and established sessions
pub mod session;

mod auth;
mod driver;
mod handshake;

#[cfg(test)]
mod test_support;

pub use buffer::{BufferAllocator, BufferGuard, PooledAllocator};
pub use client::RemoteClient;
pub use connection::{PhaseKind, RemoteConnection, Role};
pub use dispatch::RemoteConnectionHandler;
pub use error::RemlinkError;
pub use handle::{Handle, HandleRegistry, HandleState, LocalEndpoint};
pub use options::ConnectionOptions;
pub use outcome::{OutcomeSlot, PendingOutcome};
pub use security::SecurityContext;
pub use service::{RequestHandler, ServiceFactory, ServiceRegistry};
pub use session::{Connecting, ConnectionBuilder, Session};

/// Result type alias for connection operations
pub type Result<T> = std::result::Result<T, RemlinkError>;
