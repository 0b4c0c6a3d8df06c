//! Transport-level connection state
//!
//! [`RemoteConnection`] is shared by everything that sends on one transport.
//! Outbound frames go through a bounded queue to a writer task that owns the
//! write half; the driver task owns the read half. Closing is a one-way
//! latch observed by both tasks.

use crate::buffer::{BufferAllocator, BufferGuard};
use crate::options::ConnectionOptions;
use crate::{RemlinkError, Result};
use bytes::Bytes;
use remlink_proto::{Frame, FrameCodec, ProtocolError};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace};
use uuid::Uuid;

/// How long a closing connection keeps flushing frames queued before the close
pub(crate) const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// Which side of the handshake this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Receives the greeting and picks a mechanism
    Client,
    /// Sends the greeting and verifies credentials
    Server,
}

/// Kind of the phase currently handling inbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PhaseKind {
    /// Waiting for or sending the greeting
    Greeting = 0,
    /// Challenge/response exchange in progress
    Authenticating = 1,
    /// Authenticated; carrying service traffic
    SteadyState = 2,
}

impl PhaseKind {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Greeting,
            1 => Self::Authenticating,
            _ => Self::SteadyState,
        }
    }

    /// Whether a handler of this kind may hand over to `next`
    ///
    /// Phases only ever stay put or advance by one.
    pub fn may_advance_to(self, next: PhaseKind) -> bool {
        next == self || next as u8 == self as u8 + 1
    }
}

struct Outbound {
    frame: Bytes,
    ack: Option<oneshot::Sender<io::Result<()>>>,
}

/// One bidirectional transport session
pub struct RemoteConnection {
    id: Uuid,
    role: Role,
    peer: SocketAddr,
    options: ConnectionOptions,
    phase: AtomicU8,
    allocator: Arc<dyn BufferAllocator>,
    codec: FrameCodec,
    outbound: mpsc::Sender<Outbound>,
    closed: Arc<watch::Sender<bool>>,
    peer_endpoint_name: OnceLock<String>,
}

impl RemoteConnection {
    /// Wrap the write half of a transport and start its writer task
    pub(crate) fn open<W>(
        writer: W,
        role: Role,
        peer: SocketAddr,
        options: ConnectionOptions,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = Uuid::new_v4();
        let (outbound, queue) = mpsc::channel(options.send_queue_depth.max(1));
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let codec = FrameCodec::with_max_frame_size(options.max_frame_size);

        tokio::spawn(write_loop(writer, queue, Arc::clone(&closed), id));
        info!("Opened {:?} connection {} to {}", role, id, peer);

        Arc::new(Self {
            id,
            role,
            peer,
            options,
            phase: AtomicU8::new(PhaseKind::Greeting as u8),
            allocator,
            codec,
            outbound,
            closed,
            peer_endpoint_name: OnceLock::new(),
        })
    }

    /// Connection id, for logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handshake role of this end
    pub fn role(&self) -> Role {
        self.role
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Options the connection was opened with
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Phase currently handling inbound frames
    pub fn phase(&self) -> PhaseKind {
        PhaseKind::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: PhaseKind) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Endpoint name the peer announced in its greeting
    pub fn peer_endpoint_name(&self) -> Option<&str> {
        self.peer_endpoint_name.get().map(String::as_str)
    }

    pub(crate) fn set_peer_endpoint_name(&self, name: String) {
        let _ = self.peer_endpoint_name.set(name);
    }

    /// Host name handed to mechanisms
    pub fn peer_host(&self) -> String {
        self.options
            .peer_host_override
            .clone()
            .unwrap_or_else(|| self.peer.ip().to_string())
    }

    /// Borrow an outbound buffer; it is freed when the guard drops
    pub fn allocate(&self) -> BufferGuard {
        BufferGuard::allocate(&self.allocator)
    }

    /// Queue a frame without waiting
    ///
    /// `buf` starts with the reserved header. Fails with
    /// [`io::ErrorKind::WouldBlock`] when the outbound queue is full.
    pub fn send(&self, buf: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(not_connected());
        }
        let frame = self.codec.seal(buf)?;
        self.outbound
            .try_send(Outbound { frame, ack: None })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    RemlinkError::Transport(io::Error::new(io::ErrorKind::WouldBlock, "send queue full"))
                }
                mpsc::error::TrySendError::Closed(_) => not_connected(),
            })
    }

    /// Send a frame and wait until it has been written
    ///
    /// `buf` starts with the reserved header. Fails with
    /// [`io::ErrorKind::NotConnected`] as soon as the connection closes, even
    /// if the peer has stopped reading.
    pub async fn send_blocking(&self, buf: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(not_connected());
        }
        let frame = self.codec.seal(buf)?;
        let (ack, written) = oneshot::channel();
        let delivery = async {
            if self.outbound.send(Outbound { frame, ack: Some(ack) }).await.is_err() {
                return Err(not_connected());
            }
            match written.await {
                Ok(result) => result.map_err(RemlinkError::Transport),
                Err(_) => Err(not_connected()),
            }
        };
        tokio::select! {
            biased;
            result = delivery => result,
            _ = self.closed() => Err(not_connected()),
        }
    }

    /// Encode and send a frame, waiting until it has been written
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let mut buf = self.allocate();
        buf.reserve_header();
        frame.encode(&mut *buf)?;
        trace!("Connection {} sending {}", self.id, frame.message_type());
        self.send_blocking(&buf).await
    }

    /// Encode and queue a frame without waiting
    pub fn post_frame(&self, frame: &Frame) -> Result<()> {
        let mut buf = self.allocate();
        buf.reserve_header();
        frame.encode(&mut *buf)?;
        trace!("Connection {} posting {}", self.id, frame.message_type());
        self.send(&buf)
    }

    /// Close the connection; returns whether this call closed it
    pub fn force_close(&self) -> bool {
        let closed_now = self.closed.send_if_modified(|closed| !std::mem::replace(closed, true));
        if closed_now {
            info!("Closed connection {} to {}", self.id, self.peer);
        }
        closed_now
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the connection is closed
    pub async fn closed(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }
}

impl fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("phase", &self.phase())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn not_connected() -> RemlinkError {
    RemlinkError::Transport(io::Error::new(io::ErrorKind::NotConnected, "connection closed"))
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

async fn write_one<W>(codec: &FrameCodec, writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    codec.write_frame(writer, frame).await.map_err(|e| match e {
        ProtocolError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    })
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<Outbound>,
    closed: Arc<watch::Sender<bool>>,
    id: Uuid,
) where
    W: AsyncWrite + Unpin,
{
    let codec = FrameCodec::new();
    let mut closed_rx = closed.subscribe();
    let mut healthy = true;

    loop {
        let next = tokio::select! {
            biased;
            _ = wait_closed(&mut closed_rx) => None,
            next = queue.recv() => next,
        };
        let Some(outbound) = next else { break };

        // A close abandons a write the peer is not draining.
        let result = tokio::select! {
            biased;
            result = write_one(&codec, &mut writer, &outbound.frame) => result,
            _ = wait_closed(&mut closed_rx) => {
                debug!("Connection {} closed with a write in flight", id);
                Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed"))
            }
        };
        if let Err(e) = &result {
            debug!("Connection {} write failed: {}", id, e);
            healthy = false;
        }
        if let Some(ack) = outbound.ack {
            let _ = ack.send(result);
        }
        if !healthy {
            closed.send_if_modified(|closed| !std::mem::replace(closed, true));
            break;
        }
    }

    // Frames queued before the close still go out, within the linger period.
    queue.close();
    let flushed = tokio::time::timeout(CLOSE_LINGER, async {
        while let Ok(outbound) = queue.try_recv() {
            let result = if healthy {
                write_one(&codec, &mut writer, &outbound.frame).await
            } else {
                Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed"))
            };
            healthy &= result.is_ok();
            if let Some(ack) = outbound.ack {
                let _ = ack.send(result);
            }
        }
        if healthy {
            let _ = writer.shutdown().await;
        }
    })
    .await;
    if flushed.is_err() {
        debug!("Connection {} dropped unflushed frames after {:?}", id, CLOSE_LINGER);
    }
    debug!("Connection {} writer stopped", id);
}
