//! The supervisor: brings a group of agents up together.
//!
//! A rollout moves every target through `Connected`, `Configured` and
//! `Started`. Each phase runs one future per live member and waits for all
//! of them (a barrier) before the next phase begins, so no agent is
//! configured before every agent is connected, and none is started before
//! every agent is configured. If any member has failed when a barrier is
//! evaluated, the rollout stops there and every connection is closed.
//!
//! ```text
//! for phase in [Connected, Configured, Started]:
//!     join_all(members.advance(phase))     <- barrier
//!     probe every member for a closed peer
//!     any member Failed? -> abort
//! close all
//! ```

mod connection;
mod phase;

use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, info, info_span, warn};

use crate::Message;
use crate::outcome::{Outcome, combine};

pub use connection::{ConnectionRecord, PhaseError, PhaseEvent};
pub use phase::{Phase, PhaseParseError};

use connection::Events;

/// One agent to roll out: where it listens and what to send it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    /// `host:port` of the agent.
    pub address: String,
    /// The configuration message sent in the `Configured` phase.
    #[serde(default)]
    pub config: Message,
}

/// Timeouts applied to each phase.
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    pub connect_timeout: Duration,
    pub phase_timeout: Duration,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            phase_timeout: Duration::from_secs(30),
        }
    }
}

/// Final state of one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub name: String,
    pub address: String,
    /// `Failed`, or the last forward phase the member reached.
    pub phase: Phase,
    pub outcome: Outcome,
}

/// Result of a whole rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutReport {
    pub targets: Vec<TargetReport>,
    /// Aggregate of every member's outcome, tagged by target name.
    pub outcome: Outcome,
}

impl RolloutReport {
    fn new(members: &[ConnectionRecord], abort_reason: Option<&str>) -> Self {
        let targets: Vec<TargetReport> = members
            .iter()
            .map(|member| {
                let (phase, outcome) = match member.error() {
                    Some(e) => (Phase::Failed, Outcome::fail(e.to_string())),
                    None if member.reached() == Phase::Started => {
                        (Phase::Started, Outcome::ok("started"))
                    }
                    None => {
                        let outcome = Outcome::warn(format!("stopped at {}", member.reached()));
                        let outcome = match abort_reason {
                            Some(reason) => outcome.with_detail("reason", reason),
                            None => outcome,
                        };
                        (member.reached(), outcome)
                    }
                };
                TargetReport {
                    name: member.name().to_owned(),
                    address: member.target().address.clone(),
                    phase,
                    outcome,
                }
            })
            .collect();

        let outcome = combine(targets.iter().map(|t| (t.name.clone(), t.outcome.clone())));
        Self { targets, outcome }
    }

    pub fn target(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn is_failed(&self) -> bool {
        self.outcome.is_failed()
    }
}

/// A rollout over a fixed set of targets.
#[derive(Debug)]
pub struct Rollout {
    targets: Vec<Target>,
    config: RolloutConfig,
    events: Events,
    span: Span,
}

impl Rollout {
    pub fn new(targets: Vec<Target>, config: RolloutConfig) -> Self {
        let span = info_span!("rollout", targets = targets.len());
        Self {
            targets,
            config,
            events: Events::default(),
            span,
        }
    }

    /// Report every phase change of every member on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<PhaseEvent>) -> Self {
        self.events = Events(Some(tx));
        self
    }

    /// Run to completion, abort or cancellation. Every connection is
    /// closed before this returns.
    pub async fn run(self, cancel: CancellationToken) -> RolloutReport {
        let Rollout {
            targets,
            config,
            events,
            span,
        } = self;

        async move {
            let mut members: Vec<ConnectionRecord> =
                targets.into_iter().map(ConnectionRecord::new).collect();
            for member in &members {
                events.emit(member.name(), Phase::Connecting);
            }

            let mut abort_reason = None;
            for phase in [Phase::Connected, Phase::Configured, Phase::Started] {
                let timeout = match phase {
                    Phase::Connected => config.connect_timeout,
                    _ => config.phase_timeout,
                };

                let barrier =
                    join_all(members.iter_mut().map(|m| m.advance(phase, timeout, &events)));
                tokio::select! {
                    _ = barrier => {}
                    _ = cancel.cancelled() => {
                        warn!(%phase, "rollout cancelled");
                        abort_reason = Some(format!("cancelled while moving to {phase}"));
                        break;
                    }
                }

                for member in &mut members {
                    member.check_open(&events);
                }

                let failed: Vec<&str> = members
                    .iter()
                    .filter(|m| m.is_failed())
                    .map(ConnectionRecord::name)
                    .collect();
                if !failed.is_empty() {
                    warn!(%phase, ?failed, "barrier not satisfied, aborting rollout");
                    abort_reason = Some(format!("{} failed before {phase}", failed.join(", ")));
                    break;
                }
                info!(%phase, members = members.len(), "barrier passed");
            }

            for member in &mut members {
                member.close(&events).await;
            }

            let report = RolloutReport::new(&members, abort_reason.as_deref());
            info!(outcome = %report.outcome, "rollout finished");
            report
        }
        .instrument(span)
        .await
    }
}

/// Run a rollout without observing its events.
pub async fn run_rollout(
    targets: Vec<Target>,
    config: RolloutConfig,
    cancel: CancellationToken,
) -> RolloutReport {
    Rollout::new(targets, config).run(cancel).await
}
