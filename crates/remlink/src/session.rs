//! Connection setup and established sessions
//!
//! [`ConnectionBuilder`] collects options, credentials, mechanisms and local
//! services, then wraps a transport as either the client or the server end.
//! The handshake runs on a spawned driver task; [`Connecting`] waits for its
//! single outcome and yields a [`Session`] once authentication succeeds.

use crate::buffer::{BufferAllocator, PooledAllocator};
use crate::client::RemoteClient;
use crate::connection::{RemoteConnection, Role, CLOSE_LINGER};
use crate::dispatch::RemoteConnectionHandler;
use crate::driver::{Driver, Negotiation};
use crate::handle::HandleRegistry;
use crate::options::ConnectionOptions;
use crate::outcome::{outcome, PendingOutcome};
use crate::security::SecurityContext;
use crate::service::{RequestHandler, ServiceFactory, ServiceRegistry};
use crate::Result;
use remlink_sasl::{CredentialCallback, MechanismRegistry, NoCredentials};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a successful handshake hands back to the caller
pub(crate) struct Established {
    pub(crate) handler: Arc<RemoteConnectionHandler>,
}

/// Builder for one end of a connection
pub struct ConnectionBuilder {
    options: ConnectionOptions,
    callback: Arc<dyn CredentialCallback>,
    mechanisms: MechanismRegistry,
    allocator: Option<Arc<dyn BufferAllocator>>,
    services: ServiceRegistry,
}

impl ConnectionBuilder {
    /// Builder with default options, the built-in mechanisms and no secrets
    pub fn new() -> Self {
        Self {
            options: ConnectionOptions::default(),
            callback: Arc::new(NoCredentials),
            mechanisms: MechanismRegistry::with_defaults(),
            allocator: None,
            services: ServiceRegistry::new(),
        }
    }

    /// Replace the connection options
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Identity to authenticate as
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.options = self.options.with_username(username);
        self
    }

    /// Name announced in the greeting
    pub fn with_endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.options = self.options.with_endpoint_name(name);
        self
    }

    /// Callback answering the mechanism's credential prompts
    pub fn with_credentials(mut self, callback: impl CredentialCallback + 'static) -> Self {
        self.callback = Arc::new(callback);
        self
    }

    /// Shared callback answering the mechanism's credential prompts
    pub fn with_credential_callback(mut self, callback: Arc<dyn CredentialCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Replace the mechanism registry
    pub fn with_mechanisms(mut self, mechanisms: MechanismRegistry) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Use a specific buffer allocator instead of a fresh pool
    pub fn with_allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Offer a service to the peer
    pub fn with_service(mut self, name: impl Into<String>, factory: impl ServiceFactory + 'static) -> Self {
        self.services = self.services.with_service(name, factory);
        self
    }

    /// Offer a service backed by one shared handler
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        self.services = self.services.with_handler(name, handler);
        self
    }

    /// Replace the service registry
    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }

    /// Connect as the client end and wait for authentication
    pub async fn connect<T>(self, io: T, peer: SocketAddr) -> Result<Session>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.start(io, peer, Role::Client)?.established().await
    }

    /// Accept as the server end and wait for authentication
    pub async fn accept<T>(self, io: T, peer: SocketAddr) -> Result<Session>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.start(io, peer, Role::Server)?.established().await
    }

    /// Start the client handshake without waiting for it
    pub fn start_client<T>(self, io: T, peer: SocketAddr) -> Result<Connecting>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.start(io, peer, Role::Client)
    }

    /// Start the server handshake without waiting for it
    pub fn start_server<T>(self, io: T, peer: SocketAddr) -> Result<Connecting>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.start(io, peer, Role::Server)
    }

    fn start<T>(self, io: T, peer: SocketAddr, role: Role) -> Result<Connecting>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.options.validate()?;
        let allocator = self.allocator.unwrap_or_else(|| {
            Arc::new(PooledAllocator::new(
                self.options.buffer_size,
                self.options.buffer_pool_capacity,
            ))
        });

        let (reader, writer) = tokio::io::split(io);
        let connection = RemoteConnection::open(writer, role, peer, self.options, allocator);
        let (slot, pending) = outcome();
        let ctx = Negotiation {
            conn: Arc::clone(&connection),
            mechanisms: self.mechanisms,
            callback: self.callback,
            services: self.services,
            outcome: slot,
        };
        let driver = tokio::spawn(Driver::new(reader, ctx).run());

        Ok(Connecting {
            connection,
            outcome: pending,
            driver: Some(driver),
        })
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("options", &self.options)
            .field("mechanisms", &self.mechanisms)
            .field("services", &self.services)
            .finish()
    }
}

/// A connection whose handshake is in progress
///
/// Dropping it before the handshake settles closes the connection, so an
/// outer timeout around [`Connecting::established`] also releases the
/// transport.
pub struct Connecting {
    connection: Arc<RemoteConnection>,
    outcome: PendingOutcome<Established>,
    driver: Option<JoinHandle<()>>,
}

impl Connecting {
    /// Connection being negotiated
    pub fn connection(&self) -> &Arc<RemoteConnection> {
        &self.connection
    }

    /// Wait for the handshake outcome
    ///
    /// On failure the driver has finished and the connection is closed by
    /// the time this returns.
    pub async fn established(mut self) -> Result<Session> {
        let outcome = (&mut self.outcome).await;
        let driver = self.driver.take();
        match outcome {
            Ok(established) => Ok(Session {
                handler: established.handler,
                driver,
            }),
            Err(e) => {
                if let Some(driver) = driver {
                    if let Err(join) = driver.await {
                        debug!("Driver task ended abnormally: {}", join);
                    }
                }
                Err(e)
            }
        }
    }
}

impl Drop for Connecting {
    fn drop(&mut self) {
        if self.driver.is_some() && self.connection.force_close() {
            debug!("Abandoned handshake on connection {}", self.connection.id());
        }
    }
}

impl fmt::Debug for Connecting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connecting")
            .field("connection", &self.connection)
            .finish()
    }
}

/// An authenticated connection
///
/// Dropping the session closes the connection without notifying handles.
pub struct Session {
    handler: Arc<RemoteConnectionHandler>,
    driver: Option<JoinHandle<()>>,
}

impl Session {
    /// Underlying connection
    pub fn connection(&self) -> &Arc<RemoteConnection> {
        self.handler.connection()
    }

    /// Steady-state handler of the connection
    pub fn handler(&self) -> &Arc<RemoteConnectionHandler> {
        &self.handler
    }

    /// Result of authentication
    pub fn security_context(&self) -> &Arc<SecurityContext> {
        self.handler.security_context()
    }

    /// Handles the peer has open on this side
    pub fn handles(&self) -> &Arc<HandleRegistry> {
        self.handler.handles()
    }

    /// Open a client for a service on the peer
    pub async fn open_client(&self, service: &str) -> Result<RemoteClient> {
        self.handler.open_client(service).await
    }

    /// Wait until the connection closes, from either side
    pub async fn closed(&self) {
        self.handler.connection().closed().await
    }

    /// Close every handle and client, then the connection
    ///
    /// A peer that stops reading gets a short linger period to take the
    /// close notifications before the connection is closed regardless.
    pub async fn close(mut self) {
        let conn = Arc::clone(self.handler.connection());
        if tokio::time::timeout(CLOSE_LINGER, self.handler.close_all()).await.is_err() {
            warn!("Connection {} did not take close notifications within {:?}", conn.id(), CLOSE_LINGER);
        }
        conn.force_close();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                debug!("Driver task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handler.connection().force_close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("handler", &self.handler).finish()
    }
}
