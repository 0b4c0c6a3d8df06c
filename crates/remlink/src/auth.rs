//! Challenge/response authentication
//!
//! Both sides feed the peer's messages to their mechanism until the server
//! reports completion. Success yields the connection's [`SecurityContext`]
//! and hands the connection to steady-state dispatch.

use crate::connection::PhaseKind;
use crate::dispatch::RemoteConnectionHandler;
use crate::driver::{Negotiation, Phase};
use crate::security::SecurityContext;
use crate::session::Established;
use crate::{RemlinkError, Result};
use bytes::Bytes;
use remlink_proto::Frame;
use remlink_sasl::{SaslClient, SaslServer};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client side of the exchange
pub(crate) struct ClientAuthentication {
    client: Box<dyn SaslClient>,
}

impl ClientAuthentication {
    pub(crate) fn new(client: Box<dyn SaslClient>) -> Self {
        Self { client }
    }

    pub(crate) async fn handle(mut self, ctx: &Negotiation, message: Bytes) -> Result<Phase> {
        match Frame::decode(message)? {
            Frame::AuthChallenge(challenge) => {
                let response = self
                    .client
                    .evaluate_challenge(&challenge)
                    .map_err(RemlinkError::negotiation)?;
                ctx.conn.send_frame(&Frame::AuthResponse(Bytes::from(response))).await?;
                Ok(Phase::ClientAuthentication(self))
            }
            Frame::AuthComplete(final_data) => self.complete(ctx, final_data),
            Frame::AuthRejected(reason) => Err(RemlinkError::AuthenticationRejected(reason_text(&reason))),
            other => Err(RemlinkError::ProtocolViolation(format!(
                "{} during authentication",
                other.message_type()
            ))),
        }
    }

    fn complete(mut self, ctx: &Negotiation, final_data: Bytes) -> Result<Phase> {
        if !self.client.is_complete() && !final_data.is_empty() {
            self.client
                .evaluate_challenge(&final_data)
                .map_err(RemlinkError::negotiation)?;
        }
        if !self.client.is_complete() {
            return Err(RemlinkError::NegotiationFailure(format!(
                "server completed before the {} exchange did",
                self.client.mechanism_name()
            )));
        }
        establish(ctx, SecurityContext::client(self.client))
    }
}

/// Server side of the exchange
pub(crate) struct ServerAuthentication {
    server: Box<dyn SaslServer>,
}

impl ServerAuthentication {
    pub(crate) fn new(server: Box<dyn SaslServer>) -> Self {
        Self { server }
    }

    pub(crate) async fn handle(mut self, ctx: &Negotiation, message: Bytes) -> Result<Phase> {
        let response = match Frame::decode(message)? {
            Frame::AuthResponse(response) => response,
            other => {
                return Err(RemlinkError::ProtocolViolation(format!(
                    "{} during authentication",
                    other.message_type()
                )))
            }
        };

        match self.server.evaluate_response(&response) {
            Ok(final_data) if self.server.is_complete() => {
                ctx.conn
                    .send_frame(&Frame::AuthComplete(Bytes::from(final_data)))
                    .await?;
                establish(ctx, SecurityContext::server(self.server))
            }
            Ok(challenge) => {
                ctx.conn.send_frame(&Frame::AuthChallenge(Bytes::from(challenge))).await?;
                Ok(Phase::ServerAuthentication(self))
            }
            Err(e) => {
                warn!("Authentication of {} failed: {}", ctx.conn.peer(), e);
                reject(ctx, &e.to_string()).await;
                Err(RemlinkError::AuthenticationRejected(e.to_string()))
            }
        }
    }
}

/// Tell the client it was refused; delivery is best effort
pub(crate) async fn reject(ctx: &Negotiation, reason: &str) {
    let frame = Frame::AuthRejected(Bytes::copy_from_slice(reason.as_bytes()));
    if let Err(e) = ctx.conn.send_frame(&frame).await {
        debug!("Rejection not delivered: {}", e);
    }
}

fn reason_text(reason: &[u8]) -> String {
    if reason.is_empty() {
        "rejected by peer".to_string()
    } else {
        String::from_utf8_lossy(reason).into_owned()
    }
}

fn establish(ctx: &Negotiation, security: SecurityContext) -> Result<Phase> {
    info!(
        "Connection {} authenticated with {}{}",
        ctx.conn.id(),
        security.mechanism_name(),
        security
            .authorization_id()
            .map(|id| format!(" as {}", id))
            .unwrap_or_default()
    );
    let handler = Arc::new(RemoteConnectionHandler::new(
        Arc::clone(&ctx.conn),
        Arc::new(security),
        ctx.services.clone(),
    ));
    ctx.conn.set_phase(PhaseKind::SteadyState);
    ctx.outcome.resolve(Ok(Established {
        handler: Arc::clone(&handler),
    }))?;
    Ok(Phase::SteadyState(handler))
}
