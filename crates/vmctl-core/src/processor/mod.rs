//! Message processors and the registry the agent dispatches through.
//!
//! # Architecture
//!
//! ```text
//! AgentServer --framed Message--> ProcessorRegistry::dispatch
//!                                     |
//!                                     | in registration order
//!                                     v
//!                          dyn Processor::process(&Message) -> Outcome
//!                                     |
//!                  +------------------+------------------+
//!                  |                  |                  |
//!            LogProcessor   NetworkFunctionProcessor<MmeConfig>  ...
//! ```

pub mod log;
pub mod registry;
pub mod settings;

use async_trait::async_trait;

use crate::Message;
use crate::outcome::Outcome;

pub use log::LogProcessor;
pub use registry::{ProcessorRegistry, RegistryError};
pub use settings::{ProcessorKind, ProcessorKindParseError, ProcessorSettings, build_processor};

/// Something that reacts to a decoded control message.
///
/// A processor reads the fields it recognises and ignores the rest, so
/// every registered processor sees every message. It reports through the
/// returned [`Outcome`]; it must not panic on malformed input.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Registry name, unique within one agent.
    fn name(&self) -> &str;

    async fn process(&self, msg: &Message) -> Outcome;
}

// Compile-time assertion: Processor must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Processor) {}
};
