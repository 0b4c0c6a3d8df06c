//! Greeting exchange
//!
//! The server opens with a greeting listing the mechanisms it offers. The
//! client picks the first offered mechanism it can use, names it in an
//! `AuthRequest`, and both sides move on to authentication.

use crate::auth::{reject, ClientAuthentication, ServerAuthentication};
use crate::driver::{Negotiation, Phase};
use crate::options::SERVICE_NAME;
use crate::{RemlinkError, Result};
use bytes::Bytes;
use remlink_proto::{Frame, Greeting, PROTOCOL_VERSION};
use remlink_sasl::{ClientRequest, ServerRequest};
use std::sync::Arc;
use tracing::{debug, warn};

/// Client side: waiting for the server's greeting
pub(crate) struct ClientGreeting;

impl ClientGreeting {
    pub(crate) async fn handle(self, ctx: &Negotiation, message: Bytes) -> Result<Phase> {
        let greeting = Greeting::decode(message)?;
        if let Some(version) = greeting.version.filter(|v| *v != PROTOCOL_VERSION) {
            warn!(
                "Peer greeting announces version {}, continuing with {}",
                version, PROTOCOL_VERSION
            );
        }
        if greeting.skipped_options > 0 {
            debug!("Skipped {} unknown greeting options", greeting.skipped_options);
        }
        if let Some(name) = &greeting.endpoint_name {
            ctx.conn.set_peer_endpoint_name(name.clone());
        }
        debug!("Peer offers mechanisms {:?}", greeting.mechanisms);

        let options = ctx.conn.options();
        let properties = options.sasl_properties();
        let policy = options.mechanism_policy();
        let server_name = ctx.conn.peer_host();
        let request = ClientRequest {
            username: options.username(),
            protocol: SERVICE_NAME,
            server_name: &server_name,
            properties: &properties,
            policy: &policy,
            callback: Arc::clone(&ctx.callback),
        };
        let client = ctx
            .mechanisms
            .select_client(&greeting.mechanisms, &request)
            .map_err(RemlinkError::negotiation)?;

        ctx.conn
            .send_frame(&Frame::AuthRequest {
                mechanism: client.mechanism_name().to_string(),
            })
            .await?;
        Ok(Phase::ClientAuthentication(ClientAuthentication::new(client)))
    }
}

/// Server side: greeting sent, waiting for the client's choice
pub(crate) struct ServerGreeting;

impl ServerGreeting {
    /// Send the greeting
    pub(crate) async fn start(ctx: &Negotiation) -> Result<Phase> {
        let options = ctx.conn.options();
        let mut greeting = Greeting::new();
        if let Some(name) = &options.endpoint_name {
            greeting = greeting.with_endpoint_name(name.clone());
        }
        for name in ctx.mechanisms.server_mechanisms(&options.mechanism_policy()) {
            greeting = greeting.with_mechanism(name);
        }
        debug!("Offering mechanisms {:?}", greeting.mechanisms);

        ctx.conn.send_frame(&Frame::Greeting(greeting)).await?;
        Ok(Phase::ServerGreeting(Self))
    }

    pub(crate) async fn handle(self, ctx: &Negotiation, message: Bytes) -> Result<Phase> {
        let mechanism = match Frame::decode(message)? {
            Frame::AuthRequest { mechanism } => mechanism,
            other => {
                return Err(RemlinkError::ProtocolViolation(format!(
                    "expected AuthRequest, got {}",
                    other.message_type()
                )))
            }
        };

        let options = ctx.conn.options();
        let properties = options.sasl_properties();
        let policy = options.mechanism_policy();
        let server_name = options.endpoint_name.as_deref().unwrap_or("localhost");
        let request = ServerRequest {
            protocol: SERVICE_NAME,
            server_name,
            properties: &properties,
            policy: &policy,
            callback: Arc::clone(&ctx.callback),
        };

        match ctx.mechanisms.create_server(&mechanism, &request) {
            Ok(server) => {
                debug!("Client chose mechanism {}", server.mechanism_name());
                ctx.conn.send_frame(&Frame::AuthChallenge(Bytes::new())).await?;
                Ok(Phase::ServerAuthentication(ServerAuthentication::new(server)))
            }
            Err(e) => {
                reject(ctx, &e.to_string()).await;
                Err(RemlinkError::negotiation(e))
            }
        }
    }
}
