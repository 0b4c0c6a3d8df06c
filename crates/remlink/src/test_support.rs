//! Shared fixtures for unit tests

use crate::buffer::PooledAllocator;
use crate::connection::{RemoteConnection, Role};
use crate::handle::LocalEndpoint;
use crate::options::ConnectionOptions;
use crate::service::RequestHandler;
use async_trait::async_trait;
use bytes::Bytes;
use remlink_proto::{Frame, FrameCodec};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Mechanism that is complete from the start and has no security layer
pub(crate) struct Authenticated;

impl remlink_sasl::SaslClient for Authenticated {
    fn mechanism_name(&self) -> &str {
        "X-TEST"
    }

    fn evaluate_challenge(&mut self, _challenge: &[u8]) -> remlink_sasl::Result<Vec<u8>> {
        Err(remlink_sasl::SaslError::AlreadyComplete)
    }

    fn is_complete(&self) -> bool {
        true
    }
}

/// Replies with the request payload
pub(crate) struct Echo;

#[async_trait]
impl RequestHandler for Echo {
    async fn handle_request(&self, payload: Bytes, _endpoint: &LocalEndpoint) -> crate::Result<Bytes> {
        Ok(payload)
    }
}

/// Writer whose every write fails
pub(crate) struct BrokenPipe;

impl AsyncWrite for BrokenPipe {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected fault")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub(crate) fn peer() -> SocketAddr {
    "127.0.0.1:4000".parse().unwrap()
}

/// Open a connection over `writer` with a counting allocator
pub(crate) fn open_connection<W>(writer: W) -> (Arc<RemoteConnection>, Arc<PooledAllocator>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let pooled = Arc::new(PooledAllocator::new(64, 4));
    let conn = RemoteConnection::open(writer, Role::Server, peer(), ConnectionOptions::default(), pooled.clone());
    (conn, pooled)
}

/// Read and decode the next frame, failing the test after a second
pub(crate) async fn next_frame<R>(codec: &mut FrameCodec, reader: &mut R) -> Option<Frame>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(Duration::from_secs(1), codec.read_frame(reader))
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .map(|message| Frame::decode(message).unwrap())
}
