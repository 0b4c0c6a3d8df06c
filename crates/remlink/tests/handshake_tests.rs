//! End-to-end handshake tests over an in-memory transport

mod common;

use anyhow::Result;
use common::handshake;
use remlink::remlink_sasl::anonymous::AnonymousFactory;
use remlink::remlink_sasl::{ClientCredentials, MechanismRegistry, PasswordDatabase};
use remlink::{ConnectionBuilder, ConnectionOptions, PhaseKind, PooledAllocator, RemlinkError};
use std::sync::Arc;

fn plain_server() -> ConnectionBuilder {
    ConnectionBuilder::new()
        .with_endpoint_name("hub")
        .with_credentials(PasswordDatabase::new().with_user("alice", "wonderland"))
}

#[tokio::test]
async fn test_plain_handshake() -> Result<()> {
    let client = ConnectionBuilder::new()
        .with_username("alice")
        .with_credentials(ClientCredentials::password("wonderland"));
    let (server, client) = handshake(plain_server(), client).await;
    let (server, client) = (server?, client?);

    assert_eq!(server.security_context().mechanism_name(), "PLAIN");
    assert_eq!(server.security_context().authorization_id(), Some("alice"));
    assert_eq!(client.security_context().mechanism_name(), "PLAIN");
    assert_eq!(client.security_context().qop().as_deref(), Some("auth"));
    assert_eq!(client.connection().peer_endpoint_name(), Some("hub"));
    assert_eq!(server.connection().phase(), PhaseKind::SteadyState);
    assert_eq!(client.connection().phase(), PhaseKind::SteadyState);

    client.close().await;
    server.closed().await;
    Ok(())
}

#[tokio::test]
async fn test_anonymous_handshake() -> Result<()> {
    let client = ConnectionBuilder::new()
        .with_options(ConnectionOptions::new().with_disallowed_mechanism("PLAIN"))
        .with_username("visitor@example.com");
    let (server, client) = handshake(plain_server(), client).await;
    let (server, client) = (server?, client?);

    assert_eq!(client.security_context().mechanism_name(), "ANONYMOUS");
    assert_eq!(server.security_context().authorization_id(), Some("anonymous"));
    assert_eq!(server.security_context().qop().as_deref(), Some("auth"));
    Ok(())
}

#[tokio::test]
async fn test_wrong_password_fails_both_ends() {
    let client = ConnectionBuilder::new()
        .with_username("alice")
        .with_credentials(ClientCredentials::password("looking-glass"));
    let (server, client) = handshake(plain_server(), client).await;

    assert!(matches!(server, Err(RemlinkError::AuthenticationRejected(_))));
    assert!(matches!(client, Err(RemlinkError::AuthenticationRejected(_))));
}

#[tokio::test]
async fn test_no_anonymous_policy_leaves_nothing_to_choose() {
    let server = ConnectionBuilder::new().with_mechanisms(MechanismRegistry::new().with(AnonymousFactory));
    let client = ConnectionBuilder::new().with_options(ConnectionOptions::new().with_no_anonymous(true));
    let (server, client) = handshake(server, client).await;

    assert!(matches!(client, Err(RemlinkError::NegotiationFailure(_))));
    assert!(matches!(server, Err(RemlinkError::UnexpectedEof)));
}

#[tokio::test]
async fn test_options_from_json_select_mechanism() -> Result<()> {
    let options = ConnectionOptions::from_json_str(
        r#"{ "auth_username": "guest", "sasl_policy_noplaintext": true }"#,
    )?;
    let client = ConnectionBuilder::new().with_options(options);
    let (server, client) = handshake(plain_server(), client).await;
    let (server, client) = (server?, client?);

    assert_eq!(client.security_context().mechanism_name(), "ANONYMOUS");
    assert_eq!(server.security_context().authorization_id(), Some("anonymous"));
    Ok(())
}

#[tokio::test]
async fn test_invalid_options_refused_before_io() {
    let options = ConnectionOptions::new().with_send_queue_depth(0);
    let (io, _peer) = tokio::io::duplex(64);
    let result = ConnectionBuilder::new()
        .with_options(options)
        .connect(io, common::server_addr())
        .await;
    assert!(matches!(result, Err(RemlinkError::Config(_))));
}

#[tokio::test]
async fn test_failed_handshake_frees_every_buffer() -> Result<()> {
    let server_pool = Arc::new(PooledAllocator::new(256, 4));
    let client_pool = Arc::new(PooledAllocator::new(256, 4));
    let server = plain_server().with_allocator(server_pool.clone());
    let client = ConnectionBuilder::new()
        .with_username("alice")
        .with_credentials(ClientCredentials::password("wrong"))
        .with_allocator(client_pool.clone());

    let (server, client) = handshake(server, client).await;
    assert!(server.is_err() && client.is_err());

    for pool in [&server_pool, &client_pool] {
        assert!(pool.allocated() > 0);
        assert_eq!(pool.allocated(), pool.freed());
        assert_eq!(pool.outstanding(), 0);
    }
    Ok(())
}
