//! One rollout member: its target, transport and phase.
//!
//! Agents never write back, so a peer that went away is noticed by probing
//! the socket for EOF or a reset. The probe runs before every send and at
//! every barrier. Detection is best-effort between probes: a peer that
//! closes after the last probe of a rollout is reported by the phase it
//! had reached.

use std::io;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::Target;
use super::phase::Phase;

/// Why a member moved to [`Phase::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send to peer: {0}")]
    Send(#[source] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("no open connection")]
    NotConnected,

    #[error("timed out after {after:?} waiting for {phase}")]
    TimedOut { phase: Phase, after: Duration },

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },
}

/// Progress notification for observers of a rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseEvent {
    pub target: String,
    pub phase: Phase,
}

/// Optional sink for [`PhaseEvent`]s. A dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct Events(pub(crate) Option<mpsc::UnboundedSender<PhaseEvent>>);

impl Events {
    pub(crate) fn emit(&self, target: &str, phase: Phase) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(PhaseEvent {
                target: target.to_owned(),
                phase,
            });
        }
    }
}

/// Connection table entry, owned and mutated by the rollout only.
#[derive(Debug)]
pub struct ConnectionRecord {
    target: Target,
    phase: Phase,
    /// Last phase of the forward path that was reached.
    reached: Phase,
    error: Option<PhaseError>,
    stream: Option<TcpStream>,
}

impl ConnectionRecord {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            phase: Phase::Connecting,
            reached: Phase::Connecting,
            error: None,
            stream: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reached(&self) -> Phase {
        self.reached
    }

    pub fn error(&self) -> Option<&PhaseError> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Drive this member to `next` within `timeout`. Failed members are
    /// left alone.
    pub(crate) async fn advance(&mut self, next: Phase, timeout: Duration, events: &Events) {
        if self.is_failed() {
            return;
        }
        if !Phase::is_valid_transition(self.phase, next) {
            let from = self.phase;
            self.fail(PhaseError::InvalidTransition { from, to: next }, events);
            return;
        }

        match tokio::time::timeout(timeout, self.step(next)).await {
            Ok(Ok(())) => self.transition(next, events),
            Ok(Err(e)) => self.fail(e, events),
            Err(_) => self.fail(PhaseError::TimedOut { phase: next, after: timeout }, events),
        }
    }

    /// Fail the member if its peer has already closed the connection.
    pub(crate) fn check_open(&mut self, events: &Events) {
        if self.is_failed() {
            return;
        }
        let probe = match &self.stream {
            Some(stream) => ensure_open(stream),
            None => return,
        };
        if let Err(e) = probe {
            self.fail(e, events);
        }
    }

    /// Shut the transport down and move to [`Phase::Closed`].
    pub(crate) async fn close(&mut self, events: &Events) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(target_name = %self.target.name, error = %e, "error while closing connection");
            }
        }
        if self.phase != Phase::Closed {
            self.transition(Phase::Closed, events);
        }
    }

    async fn step(&mut self, next: Phase) -> Result<(), PhaseError> {
        match next {
            Phase::Connected => {
                let stream = TcpStream::connect(&self.target.address).await.map_err(|source| {
                    PhaseError::Connect {
                        address: self.target.address.clone(),
                        source,
                    }
                })?;
                self.stream = Some(stream);
                Ok(())
            }
            Phase::Configured => {
                let payload = serde_json::to_vec(&self.target.config)?;
                self.send(&payload).await
            }
            Phase::Started => {
                let payload = serde_json::to_vec(&json!({"command": "start"}))?;
                self.send(&payload).await
            }
            other => Err(PhaseError::InvalidTransition {
                from: self.phase,
                to: other,
            }),
        }
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), PhaseError> {
        let stream = self.stream.as_mut().ok_or(PhaseError::NotConnected)?;
        ensure_open(stream)?;
        stream.write_all(payload).await.map_err(PhaseError::Send)?;
        stream.flush().await.map_err(PhaseError::Send)?;
        debug!(target_name = %self.target.name, bytes = payload.len(), "payload sent");
        Ok(())
    }

    fn transition(&mut self, to: Phase, events: &Events) {
        self.phase = to;
        if !matches!(to, Phase::Failed | Phase::Closed) {
            self.reached = to;
        }
        info!(target_name = %self.target.name, phase = %to, "phase reached");
        events.emit(&self.target.name, to);
    }

    fn fail(&mut self, error: PhaseError, events: &Events) {
        warn!(target_name = %self.target.name, phase = %self.phase, error = %error, "member failed");
        self.error = Some(error);
        self.transition(Phase::Failed, events);
    }
}

/// Detect a peer that already closed its side. Agents never reply, so
/// readable data is unexpected and discarded.
fn ensure_open(stream: &TcpStream) -> Result<(), PhaseError> {
    let mut probe = [0u8; 256];
    loop {
        match stream.try_read(&mut probe) {
            Ok(0) => return Err(PhaseError::PeerClosed),
            Ok(n) => debug!(bytes = n, "discarding unexpected data from peer"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(PhaseError::Send(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn connected_record(listener: &TcpListener) -> (ConnectionRecord, TcpStream) {
        let address = listener.local_addr().unwrap().to_string();
        let mut record = ConnectionRecord::new(Target {
            name: "peer".to_string(),
            address,
            config: Message::new(),
        });
        record.advance(Phase::Connected, TIMEOUT, &Events::default()).await;
        assert_eq!(record.phase(), Phase::Connected);
        let (accepted, _) = listener.accept().await.unwrap();
        (record, accepted)
    }

    /// Wait until the peer's close is visible on our side of the socket.
    async fn wait_for_eof(record: &ConnectionRecord) {
        let stream = record.stream.as_ref().unwrap();
        tokio::time::timeout(TIMEOUT, stream.readable())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn peer_closed_before_configuration_fails_member() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut record, accepted) = connected_record(&listener).await;
        drop(accepted);
        wait_for_eof(&record).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        record.advance(Phase::Configured, TIMEOUT, &Events(Some(tx))).await;

        assert_eq!(record.phase(), Phase::Failed);
        assert_eq!(record.reached(), Phase::Connected);
        assert!(matches!(record.error(), Some(PhaseError::PeerClosed)));
        assert_eq!(rx.try_recv().unwrap().phase, Phase::Failed);
    }

    #[tokio::test]
    async fn barrier_check_fails_closed_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut record, accepted) = connected_record(&listener).await;
        drop(accepted);
        wait_for_eof(&record).await;

        record.check_open(&Events::default());
        assert!(record.is_failed());
        assert!(matches!(record.error(), Some(PhaseError::PeerClosed)));
    }

    #[tokio::test]
    async fn open_peer_passes_check_and_receives_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut record, mut accepted) = connected_record(&listener).await;

        record.check_open(&Events::default());
        assert!(!record.is_failed());

        record.advance(Phase::Configured, TIMEOUT, &Events::default()).await;
        assert_eq!(record.phase(), Phase::Configured);
        record.close(&Events::default()).await;
        assert_eq!(record.phase(), Phase::Closed);

        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut accepted, &mut received)
            .await
            .unwrap();
        assert_eq!(received, b"{}");
    }
}
