//! Service handles over established sessions

mod common;

use anyhow::Result;
use bytes::Bytes;
use common::{eventually, handshake, Upper};
use remlink::remlink_sasl::{ClientCredentials, PasswordDatabase};
use remlink::{ConnectionBuilder, PooledAllocator, RemlinkError, Session};
use std::sync::Arc;

async fn sessions(server: ConnectionBuilder, client: ConnectionBuilder) -> Result<(Session, Session)> {
    let server = server
        .with_endpoint_name("hub")
        .with_credentials(PasswordDatabase::new().with_user("alice", "wonderland"));
    let client = client
        .with_username("alice")
        .with_credentials(ClientCredentials::password("wonderland"));
    let (server, client) = handshake(server, client).await;
    Ok((server?, client?))
}

#[tokio::test]
async fn test_open_invoke_close() -> Result<()> {
    let server = ConnectionBuilder::new().with_handler("upper", Arc::new(Upper));
    let (server, client) = sessions(server, ConnectionBuilder::new()).await?;

    let upper = client.open_client("upper").await?;
    assert_eq!(upper.service(), "upper");
    assert_eq!(&upper.invoke(Bytes::from_static(b"hello")).await?[..], b"HELLO");
    assert!(matches!(
        upper.invoke(Bytes::new()).await,
        Err(RemlinkError::RemoteException(message)) if message == "empty payload"
    ));
    assert_eq!(server.handles().ids(), vec![upper.id()]);

    upper.close();
    eventually("the server handle to close", || server.handles().is_empty()).await?;
    assert!(matches!(
        upper.invoke(Bytes::from_static(b"late")).await,
        Err(RemlinkError::ClientClosed(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_unknown_service() -> Result<()> {
    let (server, client) = sessions(ConnectionBuilder::new(), ConnectionBuilder::new()).await?;

    assert!(matches!(
        client.open_client("missing").await,
        Err(RemlinkError::ServiceNotFound(name)) if name == "missing"
    ));
    assert!(server.handles().is_empty());
    assert!(client.handler().client_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_service_factory_sees_security_context() -> Result<()> {
    let server = ConnectionBuilder::new().with_service("whoami", |security: &remlink::SecurityContext| {
        if security.authorization_id() == Some("alice") {
            Ok(Arc::new(Upper) as Arc<dyn remlink::RequestHandler>)
        } else {
            Err(RemlinkError::Security("not alice".to_string()))
        }
    });
    let (_server, client) = sessions(server, ConnectionBuilder::new()).await?;

    let whoami = client.open_client("whoami").await?;
    assert_eq!(&whoami.invoke(Bytes::from_static(b"ok")).await?[..], b"OK");
    Ok(())
}

#[tokio::test]
async fn test_local_close_reaches_client() -> Result<()> {
    let server = ConnectionBuilder::new().with_handler("upper", Arc::new(Upper));
    let (server, client) = sessions(server, ConnectionBuilder::new()).await?;

    let upper = client.open_client("upper").await?;
    let handle = server.handles().get(upper.id()).expect("handle registered");
    assert!(handle.endpoint().close());

    eventually("the client to see the close", || upper.is_closed()).await?;
    eventually("the handle to leave the registry", || server.handles().is_empty()).await?;
    assert!(!handle.is_open());
    assert!(client.handler().client_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_services_in_both_directions() -> Result<()> {
    let server = ConnectionBuilder::new().with_handler("upper", Arc::new(Upper));
    let client = ConnectionBuilder::new().with_handler("callback", Arc::new(Upper));
    let (server, client) = sessions(server, client).await?;

    let forward = client.open_client("upper").await?;
    let backward = server.open_client("callback").await?;
    assert_eq!(&forward.invoke(Bytes::from_static(b"a")).await?[..], b"A");
    assert_eq!(&backward.invoke(Bytes::from_static(b"b")).await?[..], b"B");
    assert_eq!(client.handles().len(), 1);
    assert_eq!(server.handles().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_session_close_notifies_and_tears_down() -> Result<()> {
    let server = ConnectionBuilder::new().with_handler("upper", Arc::new(Upper));
    let (server, client) = sessions(server, ConnectionBuilder::new()).await?;

    let upper = client.open_client("upper").await?;
    let handle = server.handles().get(upper.id()).expect("handle registered");

    server.close().await;
    client.closed().await;
    assert!(!handle.is_open());
    assert!(upper.is_closed());
    assert!(client.connection().is_closed());
    assert!(matches!(
        client.open_client("upper").await,
        Err(RemlinkError::ConnectionClosed) | Err(RemlinkError::Transport(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_buffers_balance_after_traffic() -> Result<()> {
    let server_pool = Arc::new(PooledAllocator::new(128, 8));
    let client_pool = Arc::new(PooledAllocator::new(128, 8));
    let server = ConnectionBuilder::new()
        .with_handler("upper", Arc::new(Upper))
        .with_allocator(server_pool.clone());
    let client = ConnectionBuilder::new().with_allocator(client_pool.clone());
    let (server, client) = sessions(server, client).await?;

    let upper = client.open_client("upper").await?;
    for _ in 0..16 {
        upper.invoke(Bytes::from(vec![b'x'; 512])).await?;
    }
    upper.close();
    eventually("the handle to close", || server.handles().is_empty()).await?;
    client.close().await;
    server.closed().await;

    for pool in [&server_pool, &client_pool] {
        assert_eq!(pool.allocated(), pool.freed());
        assert!(pool.pooled() <= 8);
    }
    Ok(())
}
