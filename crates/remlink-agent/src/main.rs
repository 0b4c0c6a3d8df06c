//! Remlink Agent Binary
//!
//! Accepts remlink connections and serves the demo services.

use anyhow::Result;
use remlink_agent::{Agent, AgentConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AgentConfig::from_args(std::env::args().skip(1))?;
    info!(
        "Starting remlink agent on {} with {} users",
        config.listen,
        config.users.len()
    );

    if let Err(e) = Agent::new(config).run().await {
        error!("Agent error: {:#}", e);
        std::process::exit(1);
    }

    info!("Agent shutting down");
    Ok(())
}
