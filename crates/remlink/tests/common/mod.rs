//! Shared helpers for connection integration tests

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use remlink::{ConnectionBuilder, LocalEndpoint, RemlinkError, RequestHandler, Session};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::duplex;

/// Upper-cases ASCII payloads
pub struct Upper;

#[async_trait]
impl RequestHandler for Upper {
    async fn handle_request(&self, payload: Bytes, _endpoint: &LocalEndpoint) -> remlink::Result<Bytes> {
        if payload.is_empty() {
            return Err(RemlinkError::RemoteException("empty payload".to_string()));
        }
        Ok(Bytes::from(payload.to_ascii_uppercase()))
    }
}

pub fn client_addr() -> SocketAddr {
    "127.0.0.1:50001".parse().unwrap()
}

pub fn server_addr() -> SocketAddr {
    "127.0.0.1:7777".parse().unwrap()
}

/// Run both ends of a handshake over an in-memory pipe
pub async fn handshake(
    server: ConnectionBuilder,
    client: ConnectionBuilder,
) -> (remlink::Result<Session>, remlink::Result<Session>) {
    let (server_io, client_io) = duplex(64 * 1024);
    tokio::join!(
        server.accept(server_io, client_addr()),
        client.connect(client_io, server_addr())
    )
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually<F>(what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("timed out waiting for {}", what)
}
