//! Inbound handle tracking
//!
//! A [`Handle`] is one service endpoint the peer opened on this side, known
//! to both ends by the id the peer assigned. The [`HandleRegistry`] owns the
//! open handles of a connection and runs the close protocol:
//!
//! - a local close (the endpoint closes for any reason) tells the peer with
//!   a `ClientAsyncClose` frame;
//! - a remote close (`ClientOnewayClose`) closes the endpoint silently.
//!
//! Either way the handle moves `Open → Closing → Closed` exactly once and
//! then leaves the registry, freeing its id for reuse.

use crate::connection::RemoteConnection;
use crate::service::RequestHandler;
use crate::{RemlinkError, Result};
use bytes::BufMut;
use parking_lot::Mutex;
use remlink_proto::MessageType;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Service endpoint bound to a handle
pub struct LocalEndpoint {
    service: String,
    handler: Arc<dyn RequestHandler>,
    closed: watch::Sender<bool>,
}

impl LocalEndpoint {
    /// Bind a request handler for a named service
    pub fn new(service: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            service: service.into(),
            handler,
            closed,
        }
    }

    /// Service name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Handler serving requests on this endpoint
    pub fn handler(&self) -> &Arc<dyn RequestHandler> {
        &self.handler
    }

    /// Close the endpoint; returns whether this call closed it
    pub fn close(&self) -> bool {
        self.closed.send_if_modified(|closed| !std::mem::replace(closed, true))
    }

    /// Whether the endpoint has been closed
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Subscribe to the close notification
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEndpoint")
            .field("service", &self.service)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    /// Accepting requests
    Open = 0,
    /// Close in progress
    Closing = 1,
    /// Closed and removed from the registry
    Closed = 2,
}

/// One open inbound remote-invocation endpoint
pub struct Handle {
    id: u32,
    endpoint: Arc<LocalEndpoint>,
    state: AtomicU8,
}

impl Handle {
    fn new(id: u32, endpoint: Arc<LocalEndpoint>) -> Self {
        Self {
            id,
            endpoint,
            state: AtomicU8::new(HandleState::Open as u8),
        }
    }

    /// Id the peer assigned
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Bound endpoint
    pub fn endpoint(&self) -> &Arc<LocalEndpoint> {
        &self.endpoint
    }

    /// Current state
    pub fn state(&self) -> HandleState {
        match self.state.load(Ordering::Acquire) {
            0 => HandleState::Open,
            1 => HandleState::Closing,
            _ => HandleState::Closed,
        }
    }

    /// Whether requests may still be dispatched
    pub fn is_open(&self) -> bool {
        self.state() == HandleState::Open
    }

    /// Claim the close; only the first caller gets `true`
    fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                HandleState::Open as u8,
                HandleState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn finish_close(&self) {
        self.state.store(HandleState::Closed as u8, Ordering::Release);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("service", &self.endpoint.service())
            .field("state", &self.state())
            .finish()
    }
}

/// Open handles of one connection
pub struct HandleRegistry {
    conn: Arc<RemoteConnection>,
    handles: Mutex<HashMap<u32, Arc<Handle>>>,
}

impl HandleRegistry {
    /// Create an empty registry sending on `conn`
    pub fn new(conn: Arc<RemoteConnection>) -> Arc<Self> {
        Arc::new(Self {
            conn,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Open a handle under `id`
    ///
    /// The handle follows its endpoint: closing the endpoint starts the
    /// local close procedure.
    pub fn register(self: &Arc<Self>, id: u32, endpoint: Arc<LocalEndpoint>) -> Result<Arc<Handle>> {
        let handle = {
            let mut handles = self.handles.lock();
            if handles.contains_key(&id) {
                return Err(RemlinkError::DuplicateHandle(id));
            }
            let handle = Arc::new(Handle::new(id, Arc::clone(&endpoint)));
            handles.insert(id, Arc::clone(&handle));
            handle
        };
        debug!("Registered handle {} for service {}", id, endpoint.service());

        let mut closed = endpoint.subscribe();
        let registry = Arc::clone(self);
        let watched = Arc::clone(&handle);
        tokio::spawn(async move {
            loop {
                if *closed.borrow_and_update() {
                    break;
                }
                if closed.changed().await.is_err() {
                    break;
                }
            }
            registry.close_local(&watched).await;
        });

        Ok(handle)
    }

    /// Look up an open handle
    pub fn get(&self, id: u32) -> Option<Arc<Handle>> {
        self.handles.lock().get(&id).cloned()
    }

    /// Number of handles not yet closed
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Whether no handles are open
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Ids of the registered handles
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.handles.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Close a handle from this side and notify the peer
    ///
    /// Only the first close of a handle sends anything; notification
    /// failures are ignored.
    pub async fn close_local(&self, handle: &Handle) {
        if !handle.begin_close() {
            return;
        }
        handle.endpoint.close();

        {
            let mut buf = self.conn.allocate();
            buf.reserve_header();
            buf.put_u8(MessageType::ClientAsyncClose.code());
            buf.put_u32(handle.id);
            if let Err(e) = self.conn.send_blocking(&buf).await {
                debug!("Close notification for handle {} not delivered: {}", handle.id, e);
            }
        }

        handle.finish_close();
        self.remove(handle);
        debug!("Closed handle {}", handle.id);
    }

    /// Close a handle at the peer's request, without notifying it
    pub fn close_remote(&self, id: u32) {
        let Some(handle) = self.get(id) else {
            warn!("Peer closed unknown handle {}", id);
            return;
        };
        if !handle.begin_close() {
            return;
        }
        handle.endpoint.close();
        handle.finish_close();
        self.remove(&handle);
        debug!("Handle {} closed by peer", id);
    }

    /// Close every handle without notifying the peer
    pub fn shutdown(&self) {
        let handles: Vec<Arc<Handle>> = self.handles.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            if handle.begin_close() {
                handle.endpoint.close();
                handle.finish_close();
            }
        }
    }

    fn remove(&self, handle: &Handle) {
        let mut handles = self.handles.lock();
        // The id may already belong to a newer handle.
        if handles
            .get(&handle.id)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), handle))
        {
            handles.remove(&handle.id);
        }
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("connection", &self.conn.id())
            .field("handles", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests;
