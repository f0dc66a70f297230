use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vmctl_core::{AgentServer, ProcessorRegistry};

use crate::config::AgentConfig;

/// Build the registry, bind the listener and serve until Ctrl+C.
pub async fn run_agent(config: AgentConfig) -> Result<()> {
    let mut registry = ProcessorRegistry::new();
    for (name, settings) in &config.processors {
        registry
            .register_kind(name, settings)
            .with_context(|| format!("failed to register processor {name:?}"))?;
    }
    if registry.is_empty() {
        warn!("no processors configured, messages will be framed and dropped");
    }

    let bind = config.bind_address();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(address = %bind, framing = %config.framing, "starting agent");

    // First signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let server = AgentServer::new(registry, config.framing);
    server.serve(listener, cancel).await;
    Ok(())
}
