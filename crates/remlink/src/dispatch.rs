//! Steady-state frame dispatch
//!
//! Once authenticated, every inbound frame is routed here. Handle control
//! frames go to the [`HandleRegistry`] or the client table; requests run on
//! their own tasks so a slow handler never stalls the connection.

use crate::client::{ClientTable, RemoteClient};
use crate::connection::RemoteConnection;
use crate::handle::{HandleRegistry, LocalEndpoint};
use crate::security::SecurityContext;
use crate::service::ServiceRegistry;
use crate::{RemlinkError, Result};
use bytes::Bytes;
use remlink_proto::Frame;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handler for an authenticated connection
pub struct RemoteConnectionHandler {
    conn: Arc<RemoteConnection>,
    security: Arc<SecurityContext>,
    services: ServiceRegistry,
    handles: Arc<HandleRegistry>,
    clients: Arc<ClientTable>,
}

impl RemoteConnectionHandler {
    pub(crate) fn new(conn: Arc<RemoteConnection>, security: Arc<SecurityContext>, services: ServiceRegistry) -> Self {
        Self {
            handles: HandleRegistry::new(Arc::clone(&conn)),
            clients: ClientTable::new(),
            conn,
            security,
            services,
        }
    }

    /// Connection this handler serves
    pub fn connection(&self) -> &Arc<RemoteConnection> {
        &self.conn
    }

    /// Security context of the connection
    pub fn security_context(&self) -> &Arc<SecurityContext> {
        &self.security
    }

    /// Handles the peer has open on this side
    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    /// Ids of the clients this side has open on the peer
    pub fn client_ids(&self) -> Vec<u32> {
        self.clients.open_ids()
    }

    /// Open a client for a service on the peer
    pub async fn open_client(&self, service: &str) -> Result<RemoteClient> {
        self.clients.open(&self.conn, service).await
    }

    /// Process one inbound message
    pub(crate) async fn handle_message(&self, message: Bytes) -> Result<()> {
        let frame = Frame::decode(message)?;
        debug!("Connection {} received {}", self.conn.id(), frame.message_type());

        match frame {
            Frame::ServiceRequest { id, service } => self.open_service(id, &service).await,
            Frame::ServiceClientOpened { id } => {
                self.clients.complete_open(id, true);
                Ok(())
            }
            Frame::ServiceNotFound { id } => {
                self.clients.complete_open(id, false);
                Ok(())
            }
            Frame::Request {
                id,
                request_id,
                payload,
            } => self.dispatch_request(id, request_id, payload),
            Frame::Reply { request_id, payload } => {
                self.clients.complete_request(request_id, Ok(payload));
                Ok(())
            }
            Frame::ReplyException { request_id, message } => {
                self.clients
                    .complete_request(request_id, Err(RemlinkError::RemoteException(message)));
                Ok(())
            }
            Frame::ClientAsyncClose { id } => {
                debug!("Peer closed the handle behind client {}", id);
                self.clients.close_client(id);
                Ok(())
            }
            Frame::ClientOnewayClose { id } => {
                self.handles.close_remote(id);
                Ok(())
            }
            other => Err(RemlinkError::ProtocolViolation(format!(
                "{} after authentication",
                other.message_type()
            ))),
        }
    }

    async fn open_service(&self, id: u32, service: &str) -> Result<()> {
        let handler = match self.services.get(service).map(|factory| factory.open(&self.security)) {
            Some(Ok(handler)) => handler,
            Some(Err(e)) => {
                warn!("Service {} refused handle {}: {}", service, id, e);
                return self.conn.send_frame(&Frame::ServiceNotFound { id }).await;
            }
            None => {
                debug!("No service {} for handle {}", service, id);
                return self.conn.send_frame(&Frame::ServiceNotFound { id }).await;
            }
        };

        let endpoint = Arc::new(LocalEndpoint::new(service, handler));
        self.handles.register(id, endpoint).map_err(|e| match e {
            RemlinkError::DuplicateHandle(id) => {
                RemlinkError::ProtocolViolation(format!("handle {} opened twice", id))
            }
            other => other,
        })?;
        self.conn.send_frame(&Frame::ServiceClientOpened { id }).await
    }

    fn dispatch_request(&self, id: u32, request_id: u32, payload: Bytes) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let Some(handle) = self.handles.get(id).filter(|handle| handle.is_open()) else {
            warn!("Request {} for handle {} which is not open", request_id, id);
            tokio::spawn(async move {
                let reply = Frame::ReplyException {
                    request_id,
                    message: format!("no open handle {}", id),
                };
                if let Err(e) = conn.send_frame(&reply).await {
                    debug!("Reply to request {} not delivered: {}", request_id, e);
                }
            });
            return Ok(());
        };

        tokio::spawn(async move {
            let endpoint = handle.endpoint();
            let reply = match endpoint.handler().handle_request(payload, endpoint).await {
                Ok(payload) => Frame::Reply { request_id, payload },
                Err(RemlinkError::RemoteException(message)) => Frame::ReplyException { request_id, message },
                Err(e) => Frame::ReplyException {
                    request_id,
                    message: e.to_string(),
                },
            };
            if let Err(e) = conn.send_frame(&reply).await {
                debug!("Reply to request {} not delivered: {}", request_id, e);
            }
        });
        Ok(())
    }

    /// Close every handle and client, telling the peer about each
    pub async fn close_all(&self) {
        for id in self.handles.ids() {
            if let Some(handle) = self.handles.get(id) {
                self.handles.close_local(&handle).await;
            }
        }
        for id in self.clients.open_ids() {
            self.clients.close_client(id);
            if let Err(e) = self.conn.send_frame(&Frame::ClientOnewayClose { id }).await {
                debug!("Close of client {} not delivered: {}", id, e);
            }
        }
    }

    /// Drop all state at connection teardown, without notifying the peer
    pub(crate) fn shutdown(&self) {
        self.handles.shutdown();
        self.clients.shutdown();
    }
}

impl fmt::Debug for RemoteConnectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConnectionHandler")
            .field("connection", &self.conn.id())
            .field("security", &self.security)
            .field("handles", &self.handles.ids())
            .field("clients", &self.clients.open_ids())
            .finish()
    }
}
