//! Listener loop

use crate::config::AgentConfig;
use crate::handlers;
use anyhow::{Context, Result};
use remlink::remlink_sasl::PasswordDatabase;
use remlink::{ConnectionBuilder, ServiceRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Accepts connections and serves the demo services on each
pub struct Agent {
    config: AgentConfig,
    users: Arc<PasswordDatabase>,
    services: ServiceRegistry,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

impl Agent {
    /// Create an agent serving the default services
    pub fn new(config: AgentConfig) -> Self {
        let users: PasswordDatabase = config
            .users
            .iter()
            .map(|(user, password)| (user.clone(), password.clone()))
            .collect();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Self {
            config,
            users: Arc::new(users),
            services: handlers::services(),
            shutdown_tx: Some(shutdown_tx),
            shutdown_rx: Some(shutdown_rx),
        }
    }

    /// Replace the offered services
    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Get shutdown sender for graceful shutdown
    pub fn shutdown_sender(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    fn builder(&self) -> ConnectionBuilder {
        ConnectionBuilder::new()
            .with_options(self.config.connection.clone())
            .with_credential_callback(self.users.clone())
            .with_services(self.services.clone())
    }

    /// Serve one accepted transport until it closes
    pub async fn serve_connection<T>(&self, io: T, peer: SocketAddr) -> remlink::Result<()>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = self.builder().accept(io, peer).await?;
        info!(
            "{} authenticated via {} as {}",
            peer,
            session.security_context().mechanism_name(),
            session.security_context().authorization_id().unwrap_or("-")
        );
        session.closed().await;
        info!("{} disconnected", peer);
        Ok(())
    }

    /// Bind the configured address and run until shut down
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen))?;
        self.run_on(listener).await
    }

    /// Accept connections from `listener` until shut down
    pub async fn run_on(mut self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .context("Shutdown receiver already taken")?;
        info!("Listening on {}", listener.local_addr()?);

        let agent = Arc::new(self);
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Received shutdown signal, stopping agent");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    let agent = Arc::clone(&agent);
                    tokio::spawn(async move {
                        if let Err(e) = agent.serve_connection(stream, peer).await {
                            warn!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
            }
        }

        info!("Agent stopped");
        Ok(())
    }
}
