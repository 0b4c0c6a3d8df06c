//! Unit tests for the handle lifecycle

use super::*;
use crate::test_support::{next_frame, open_connection, BrokenPipe, Echo};
use remlink_proto::{Frame, FrameCodec};
use std::time::Duration;
use tokio::io::duplex;

fn endpoint(service: &str) -> Arc<LocalEndpoint> {
    Arc::new(LocalEndpoint::new(service, Arc::new(Echo)))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_register_rejects_duplicate_id() {
    let (writer, _reader) = duplex(1024);
    let (conn, _) = open_connection(writer);
    let registry = HandleRegistry::new(conn);

    let handle = registry.register(5, endpoint("echo")).unwrap();
    assert_eq!(handle.state(), HandleState::Open);
    assert!(matches!(
        registry.register(5, endpoint("echo")),
        Err(RemlinkError::DuplicateHandle(5))
    ));
    assert_eq!(registry.ids(), vec![5]);
}

#[tokio::test]
async fn test_close_twice_sends_one_notification() {
    let (writer, mut reader) = duplex(1024);
    let (conn, pooled) = open_connection(writer);
    let registry = HandleRegistry::new(Arc::clone(&conn));

    let handle = registry.register(9, endpoint("echo")).unwrap();
    registry.close_local(&handle).await;
    registry.close_local(&handle).await;
    assert_eq!(handle.state(), HandleState::Closed);
    assert!(handle.endpoint().is_closed());
    assert!(registry.is_empty());

    // Give the endpoint watcher a chance to run its own (no-op) close.
    tokio::time::sleep(Duration::from_millis(20)).await;
    conn.force_close();

    let mut codec = FrameCodec::new();
    assert_eq!(
        next_frame(&mut codec, &mut reader).await,
        Some(Frame::ClientAsyncClose { id: 9 })
    );
    assert_eq!(next_frame(&mut codec, &mut reader).await, None);
    assert_eq!(pooled.outstanding(), 0);
}

#[tokio::test]
async fn test_endpoint_close_starts_local_close() {
    let (writer, mut reader) = duplex(1024);
    let (conn, _) = open_connection(writer);
    let registry = HandleRegistry::new(conn);

    let handle = registry.register(3, endpoint("echo")).unwrap();
    assert!(handle.endpoint().close());

    let mut codec = FrameCodec::new();
    assert_eq!(
        next_frame(&mut codec, &mut reader).await,
        Some(Frame::ClientAsyncClose { id: 3 })
    );
    wait_until(|| registry.is_empty()).await;
    assert_eq!(handle.state(), HandleState::Closed);
}

#[tokio::test]
async fn test_remote_close_is_silent_and_frees_id() {
    let (writer, mut reader) = duplex(1024);
    let (conn, _) = open_connection(writer);
    let registry = HandleRegistry::new(Arc::clone(&conn));

    let first = registry.register(4, endpoint("echo")).unwrap();
    registry.close_remote(4);
    assert_eq!(first.state(), HandleState::Closed);
    assert!(first.endpoint().is_closed());
    assert!(registry.get(4).is_none());

    // The id is free again, and the old watcher must not touch the new handle.
    let second = registry.register(4, endpoint("echo")).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(second.is_open());
    assert_eq!(registry.ids(), vec![4]);

    conn.force_close();
    let mut codec = FrameCodec::new();
    assert_eq!(next_frame(&mut codec, &mut reader).await, None);
}

#[tokio::test]
async fn test_remote_close_of_unknown_id() {
    let (writer, _reader) = duplex(1024);
    let (conn, _) = open_connection(writer);
    let registry = HandleRegistry::new(conn);
    registry.close_remote(42);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_close_survives_io_fault() {
    let (conn, pooled) = open_connection(BrokenPipe);
    let registry = HandleRegistry::new(conn);

    let handle = registry.register(1, endpoint("echo")).unwrap();
    registry.close_local(&handle).await;

    assert_eq!(handle.state(), HandleState::Closed);
    assert!(registry.is_empty());
    assert_eq!(pooled.allocated(), 1);
    assert_eq!(pooled.freed(), 1);
}

#[tokio::test]
async fn test_shutdown_closes_everything_silently() {
    let (writer, mut reader) = duplex(1024);
    let (conn, pooled) = open_connection(writer);
    let registry = HandleRegistry::new(Arc::clone(&conn));

    let handles: Vec<_> = (1..=3)
        .map(|id| registry.register(id, endpoint("echo")).unwrap())
        .collect();
    registry.shutdown();

    assert!(registry.is_empty());
    for handle in &handles {
        assert_eq!(handle.state(), HandleState::Closed);
        assert!(handle.endpoint().is_closed());
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    conn.force_close();
    let mut codec = FrameCodec::new();
    assert_eq!(next_frame(&mut codec, &mut reader).await, None);
    assert_eq!(pooled.allocated(), 0);
}
