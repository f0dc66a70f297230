//! Shared test utilities for vmctl integration tests.
//!
//! Provides in-memory stand-ins for the agent's collaborators (processors,
//! process controllers, configuration appliers) and real TCP endpoints on
//! the loopback interface for rollout tests:
//!
//! - [`spawn_recording_agent`]: a full [`AgentServer`] whose only
//!   processor records every message it receives.
//! - [`refused_addr`]: an address nothing listens on.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vmctl_core::apply::ConfigApplier;
use vmctl_core::runner::ProcessController;
use vmctl_core::{AgentServer, BraceMode, Message, Outcome, Processor, ProcessorRegistry};

/// Turn a `json!` object literal into a [`Message`].
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
pub fn msg(value: Value) -> Message {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Processors
// ---------------------------------------------------------------------------

/// A processor that stores every message and answers with a fixed outcome.
#[derive(Debug, Clone)]
pub struct RecordingProcessor {
    name: String,
    outcome: Outcome,
    seen: Arc<Mutex<Vec<Message>>>,
}

impl RecordingProcessor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::ok("recorded"),
            seen: Arc::default(),
        }
    }

    pub fn returning(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Messages received so far, in arrival order.
    pub fn messages(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, msg: &Message) -> Outcome {
        self.seen.lock().unwrap().push(msg.clone());
        self.outcome.clone()
    }
}

// ---------------------------------------------------------------------------
// Process controller
// ---------------------------------------------------------------------------

/// A process controller that only counts calls.
#[derive(Debug, Default)]
pub struct MockController {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub restarts: AtomicUsize,
    running: AtomicBool,
    fail_start: AtomicBool,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `start` return an error.
    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessController for MockController {
    async fn start(&self) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("mock start failure");
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn restart(&self) -> anyhow::Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn output(&self) -> String {
        String::from("mock output")
    }
}

// ---------------------------------------------------------------------------
// Configuration applier
// ---------------------------------------------------------------------------

/// An applier for any record type that returns a fixed outcome.
#[derive(Debug, Clone)]
pub struct MockApplier {
    outcome: Outcome,
    calls: Arc<AtomicUsize>,
}

impl MockApplier {
    pub fn returning(outcome: Outcome) -> Self {
        Self {
            outcome,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: Sync> ConfigApplier<C> for MockApplier {
    async fn configure(&self, _config: &C) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

// ---------------------------------------------------------------------------
// Network endpoints
// ---------------------------------------------------------------------------

/// A running agent on the loopback interface.
pub struct TestAgent {
    pub addr: SocketAddr,
    pub processor: RecordingProcessor,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestAgent {
    /// Wait until the agent has dispatched at least `count` messages.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within five seconds.
    pub async fn wait_for_messages(&self, count: usize) -> Vec<Message> {
        for _ in 0..250 {
            let seen = self.processor.messages();
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!(
            "agent at {} received {} messages, expected {count}",
            self.addr,
            self.processor.messages().len()
        );
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Start an [`AgentServer`] with a single [`RecordingProcessor`].
pub async fn spawn_recording_agent() -> TestAgent {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind loopback listener");
    let addr = listener.local_addr().expect("listener has no address");

    let processor = RecordingProcessor::new("recorder");
    let mut registry = ProcessorRegistry::new();
    registry
        .register(processor.clone())
        .expect("failed to register recorder");

    let server = AgentServer::new(registry, BraceMode::Lexical);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { server.serve(listener, token).await });

    TestAgent {
        addr,
        processor,
        cancel,
        handle,
    }
}

/// An address on the loopback interface with nothing listening.
pub fn refused_addr() -> String {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind loopback listener");
    let addr = listener.local_addr().expect("listener has no address");
    drop(listener);
    addr.to_string()
}
