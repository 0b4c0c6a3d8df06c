//! Inbound driver task
//!
//! One driver per connection owns the read half. It feeds every inbound
//! message to the current phase handler, which consumes itself and returns
//! the handler for the next message. Exactly one phase is active at a time.

use crate::auth::{ClientAuthentication, ServerAuthentication};
use crate::connection::{PhaseKind, RemoteConnection, Role};
use crate::dispatch::RemoteConnectionHandler;
use crate::handshake::{ClientGreeting, ServerGreeting};
use crate::outcome::OutcomeSlot;
use crate::service::ServiceRegistry;
use crate::session::Established;
use crate::{RemlinkError, Result};
use bytes::Bytes;
use remlink_proto::FrameCodec;
use remlink_sasl::{CredentialCallback, MechanismRegistry};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};

/// State shared by every phase of one connection
pub(crate) struct Negotiation {
    pub(crate) conn: Arc<RemoteConnection>,
    pub(crate) mechanisms: MechanismRegistry,
    pub(crate) callback: Arc<dyn CredentialCallback>,
    pub(crate) services: ServiceRegistry,
    pub(crate) outcome: OutcomeSlot<Established>,
}

/// Handler for the next inbound message
pub(crate) enum Phase {
    ClientGreeting(ClientGreeting),
    ServerGreeting(ServerGreeting),
    ClientAuthentication(ClientAuthentication),
    ServerAuthentication(ServerAuthentication),
    SteadyState(Arc<RemoteConnectionHandler>),
}

impl Phase {
    fn kind(&self) -> PhaseKind {
        match self {
            Phase::ClientGreeting(_) | Phase::ServerGreeting(_) => PhaseKind::Greeting,
            Phase::ClientAuthentication(_) | Phase::ServerAuthentication(_) => PhaseKind::Authenticating,
            Phase::SteadyState(_) => PhaseKind::SteadyState,
        }
    }

    async fn handle(self, ctx: &Negotiation, message: Bytes) -> Result<Phase> {
        match self {
            Phase::ClientGreeting(phase) => phase.handle(ctx, message).await,
            Phase::ServerGreeting(phase) => phase.handle(ctx, message).await,
            Phase::ClientAuthentication(phase) => phase.handle(ctx, message).await,
            Phase::ServerAuthentication(phase) => phase.handle(ctx, message).await,
            Phase::SteadyState(handler) => {
                if let Err(e) = handler.handle_message(message).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!("Connection {} dropped a message: {}", ctx.conn.id(), e);
                }
                Ok(Phase::SteadyState(handler))
            }
        }
    }
}

pub(crate) struct Driver<R> {
    reader: R,
    codec: FrameCodec,
    ctx: Negotiation,
    steady: Option<Arc<RemoteConnectionHandler>>,
}

impl<R> Driver<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub(crate) fn new(reader: R, ctx: Negotiation) -> Self {
        let codec = FrameCodec::with_max_frame_size(ctx.conn.options().max_frame_size);
        Self {
            reader,
            codec,
            ctx,
            steady: None,
        }
    }

    /// Drive the connection until it closes
    pub(crate) async fn run(mut self) {
        debug!(
            "Driver started for {:?} connection {} with {}",
            self.ctx.conn.role(),
            self.ctx.conn.id(),
            self.ctx.conn.peer()
        );
        let cause = self.drive().await;
        self.teardown(cause);
    }

    async fn drive(&mut self) -> RemlinkError {
        let mut phase = match self.ctx.conn.role() {
            Role::Client => Phase::ClientGreeting(ClientGreeting),
            Role::Server => match ServerGreeting::start(&self.ctx).await {
                Ok(phase) => phase,
                Err(e) => return e,
            },
        };

        loop {
            let read = tokio::select! {
                read = self.codec.read_frame(&mut self.reader) => read,
                _ = self.ctx.conn.closed() => return RemlinkError::ConnectionClosed,
            };
            let message = match read {
                Ok(Some(message)) => message,
                Ok(None) if phase.kind() == PhaseKind::SteadyState => return RemlinkError::ConnectionClosed,
                Ok(None) => return RemlinkError::UnexpectedEof,
                Err(e) => return e.into(),
            };

            let current = phase.kind();
            phase = match phase.handle(&self.ctx, message).await {
                Ok(next) => next,
                Err(e) => return e,
            };

            let next = phase.kind();
            if next == current {
                continue;
            }
            if !current.may_advance_to(next) {
                error!("Illegal phase change {:?} -> {:?}", current, next);
                return RemlinkError::ProtocolViolation(format!("phase {:?} cannot follow {:?}", next, current));
            }
            debug!("Connection {} entering {:?}", self.ctx.conn.id(), next);
            self.ctx.conn.set_phase(next);
            if let Phase::SteadyState(handler) = &phase {
                self.steady = Some(Arc::clone(handler));
            }
        }
    }

    fn teardown(&mut self, cause: RemlinkError) {
        let conn = &self.ctx.conn;
        if !self.ctx.outcome.is_resolved() {
            warn!("Handshake with {} failed: {}", conn.peer(), cause);
            let _ = self.ctx.outcome.resolve(Err(cause));
        } else if matches!(cause, RemlinkError::ConnectionClosed) {
            info!("Connection {} closed", conn.id());
        } else {
            warn!("Connection {} failed: {}", conn.id(), cause);
        }

        if let Some(handler) = self.steady.take() {
            handler.shutdown();
        }
        conn.force_close();
    }
}
