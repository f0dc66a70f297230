//! The agent: a TCP server that frames incoming bytes into messages and
//! hands each message to the processor registry.
//!
//! One task runs per accepted connection. Connection tasks only log their
//! errors; nothing a peer sends can stop the accept loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::framer::{BraceMode, FrameError, Framer};
use crate::outcome::{Outcome, Status, combine};
use crate::processor::ProcessorRegistry;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves one registry on a listener.
#[derive(Debug)]
pub struct AgentServer {
    registry: Arc<ProcessorRegistry>,
    mode: BraceMode,
    span: Span,
}

impl AgentServer {
    /// The registry is frozen here; it is shared read-only by every
    /// connection from now on.
    pub fn new(registry: ProcessorRegistry, mode: BraceMode) -> Self {
        let span = info_span!("agent", framing = %mode);
        Self {
            registry: Arc::new(registry),
            mode,
            span,
        }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Accept connections until `cancel` fires. Open connections are
    /// aborted on cancellation.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(parent: &self.span, %addr, processors = ?self.registry.names(), "agent listening");
        }

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(parent: &self.span, error = %e, "failed to accept connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    info!(parent: &self.span, %peer, "connection accepted");

                    let registry = Arc::clone(&self.registry);
                    let mode = self.mode;
                    let span = info_span!(parent: &self.span, "connection", %peer);
                    connections.spawn(
                        async move {
                            let outcomes = handle_connection(stream, &registry, mode).await;
                            info!(messages = outcomes.len(), "connection closed");
                        }
                        .instrument(span),
                    );
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = cancel.cancelled() => {
                    info!(parent: &self.span, open = connections.len(), "agent shutting down");
                    break;
                }
            }
        }

        connections.shutdown().await;
    }
}

/// Read messages from one connection until it closes, dispatching each to
/// the registry. Returns the combined outcome of every message.
pub async fn handle_connection<R>(
    mut reader: R,
    registry: &ProcessorRegistry,
    mode: BraceMode,
) -> Vec<Outcome>
where
    R: AsyncRead + Unpin,
{
    let mut framer = Framer::new(mode);
    let mut outcomes = Vec::new();

    loop {
        let msg = match framer.read_message(&mut reader).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(FrameError::Truncated(pending)) => {
                warn!(pending, "connection closed inside a message, discarding it");
                break;
            }
            Err(FrameError::Io(e)) => {
                warn!(error = %e, "failed to read from connection");
                break;
            }
        };

        debug!(keys = ?msg.keys().collect::<Vec<_>>(), "received message");
        let outcome = combine(registry.dispatch(&msg).await);
        match outcome.status {
            Status::Ok => info!(%outcome, "message processed"),
            Status::Warning => warn!(%outcome, "message processed with warnings"),
            Status::Failed => warn!(%outcome, "message processing failed"),
        }
        outcomes.push(outcome);
    }

    outcomes
}
