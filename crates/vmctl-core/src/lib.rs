//! Core of vmctl: a JSON-over-TCP control plane for network-function VMs.
//!
//! The agent side ([`agent`]) listens for concatenated JSON objects, frames
//! them ([`framer`]) and dispatches each to a [`processor::ProcessorRegistry`].
//! Role processors ([`roles`]) turn a message into file edits ([`apply`])
//! and lifecycle commands ([`runner`]). The supervisor side ([`supervisor`])
//! rolls a configuration out to several agents behind phase barriers.
//! Every step reports an [`outcome::Outcome`].

pub mod agent;
pub mod apply;
pub mod framer;
pub mod message;
pub mod outcome;
pub mod processor;
pub mod roles;
pub mod runner;
pub mod supervisor;

/// A decoded control message: always a JSON object.
pub type Message = serde_json::Map<String, serde_json::Value>;

pub use agent::AgentServer;
pub use framer::{BraceMode, Framer};
pub use outcome::{Outcome, Status, combine};
pub use processor::{Processor, ProcessorRegistry};
pub use supervisor::{Rollout, RolloutConfig, RolloutReport, Target, run_rollout};
