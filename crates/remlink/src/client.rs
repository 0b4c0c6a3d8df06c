//! Outbound service clients
//!
//! A [`RemoteClient`] is the local proxy for a service opened on the peer.
//! The [`ClientTable`] assigns client ids and correlates open requests and
//! invocations with the frames that answer them.

use crate::connection::RemoteConnection;
use crate::{RemlinkError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use remlink_proto::Frame;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct PendingOpen {
    service: String,
    closed: Arc<AtomicBool>,
    opened: oneshot::Sender<Result<()>>,
}

struct PendingRequest {
    client: u32,
    reply: oneshot::Sender<Result<Bytes>>,
}

#[derive(Default)]
struct TableState {
    opening: HashMap<u32, PendingOpen>,
    open: HashMap<u32, Arc<AtomicBool>>,
    requests: HashMap<u32, PendingRequest>,
    shut_down: bool,
}

/// Outbound clients of one connection
pub(crate) struct ClientTable {
    next_id: AtomicU32,
    next_request: AtomicU32,
    state: Mutex<TableState>,
}

impl ClientTable {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(1),
            next_request: AtomicU32::new(1),
            state: Mutex::new(TableState::default()),
        })
    }

    /// Open a client for a service on the peer
    pub(crate) async fn open(self: &Arc<Self>, conn: &Arc<RemoteConnection>, service: &str) -> Result<RemoteClient> {
        let (id, closed, opened) = self.begin_open(service)?;
        let request = Frame::ServiceRequest {
            id,
            service: service.to_string(),
        };
        if let Err(e) = conn.send_frame(&request).await {
            self.state.lock().opening.remove(&id);
            return Err(e);
        }

        opened.await.unwrap_or(Err(RemlinkError::ConnectionClosed))?;
        debug!("Opened client {} for service {}", id, service);
        Ok(RemoteClient {
            id,
            service: service.to_string(),
            conn: Arc::clone(conn),
            table: Arc::clone(self),
            closed,
        })
    }

    fn begin_open(&self, service: &str) -> Result<(u32, Arc<AtomicBool>, oneshot::Receiver<Result<()>>)> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(RemlinkError::ConnectionClosed);
        }
        let id = loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !state.opening.contains_key(&id) && !state.open.contains_key(&id) {
                break id;
            }
        };
        let closed = Arc::new(AtomicBool::new(false));
        let (opened, receiver) = oneshot::channel();
        state.opening.insert(
            id,
            PendingOpen {
                service: service.to_string(),
                closed: Arc::clone(&closed),
                opened,
            },
        );
        Ok((id, closed, receiver))
    }

    /// The peer answered an open request
    pub(crate) fn complete_open(&self, id: u32, found: bool) {
        let mut state = self.state.lock();
        let Some(pending) = state.opening.remove(&id) else {
            warn!("Open reply for unknown client {}", id);
            return;
        };
        let result = if found {
            state.open.insert(id, pending.closed);
            Ok(())
        } else {
            Err(RemlinkError::ServiceNotFound(pending.service))
        };
        if pending.opened.send(result).is_err() {
            debug!("Open of client {} was abandoned", id);
        }
    }

    fn begin_request(&self, client: u32) -> Result<(u32, oneshot::Receiver<Result<Bytes>>)> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(RemlinkError::ConnectionClosed);
        }
        if !state.open.contains_key(&client) {
            return Err(RemlinkError::ClientClosed(client));
        }
        let request_id = loop {
            let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
            if !state.requests.contains_key(&request_id) {
                break request_id;
            }
        };
        let (reply, receiver) = oneshot::channel();
        state.requests.insert(request_id, PendingRequest { client, reply });
        Ok((request_id, receiver))
    }

    /// The peer answered an invocation
    pub(crate) fn complete_request(&self, request_id: u32, result: Result<Bytes>) {
        let pending = self.state.lock().requests.remove(&request_id);
        match pending {
            Some(pending) => {
                let _ = pending.reply.send(result);
            }
            None => warn!("Reply for unknown request {}", request_id),
        }
    }

    /// Mark a client closed and fail its outstanding requests
    pub(crate) fn close_client(&self, client: u32) {
        let mut state = self.state.lock();
        if let Some(closed) = state.open.remove(&client) {
            closed.store(true, Ordering::Release);
        }
        let failed: Vec<u32> = state
            .requests
            .iter()
            .filter(|(_, pending)| pending.client == client)
            .map(|(request_id, _)| *request_id)
            .collect();
        for request_id in failed {
            if let Some(pending) = state.requests.remove(&request_id) {
                let _ = pending.reply.send(Err(RemlinkError::ClientClosed(client)));
            }
        }
    }

    /// Fail everything outstanding; later opens and invocations fail too
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        for (_, pending) in state.opening.drain() {
            pending.closed.store(true, Ordering::Release);
            let _ = pending.opened.send(Err(RemlinkError::ConnectionClosed));
        }
        for (_, closed) in state.open.drain() {
            closed.store(true, Ordering::Release);
        }
        for (_, pending) in state.requests.drain() {
            let _ = pending.reply.send(Err(RemlinkError::ConnectionClosed));
        }
    }

    /// Ids of the open clients
    pub(crate) fn open_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.state.lock().open.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Proxy for a service opened on the peer
pub struct RemoteClient {
    id: u32,
    service: String,
    conn: Arc<RemoteConnection>,
    table: Arc<ClientTable>,
    closed: Arc<AtomicBool>,
}

impl RemoteClient {
    /// Id this side assigned to the handle
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Service name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether the client was closed by either side
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invoke the service and wait for its reply
    pub async fn invoke(&self, payload: Bytes) -> Result<Bytes> {
        if self.is_closed() {
            return Err(RemlinkError::ClientClosed(self.id));
        }
        let (request_id, reply) = self.table.begin_request(self.id)?;
        let request = Frame::Request {
            id: self.id,
            request_id,
            payload,
        };
        if let Err(e) = self.conn.send_frame(&request).await {
            self.table.state.lock().requests.remove(&request_id);
            return Err(e);
        }
        reply.await.unwrap_or(Err(RemlinkError::ConnectionClosed))
    }

    /// Close the client and tell the peer, without waiting
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.table.close_client(self.id);
        if let Err(e) = self.conn.post_frame(&Frame::ClientOnewayClose { id: self.id }) {
            debug!("Close of client {} not delivered: {}", self.id, e);
        }
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("closed", &self.is_closed())
            .finish()
    }
}
