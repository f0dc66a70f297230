//! Configuration appliers: the side-effecting half of a processor.
//!
//! A role processor parses a message into a typed record and hands it to a
//! [`ConfigApplier`], which edits configuration files, the hosts table and
//! certificates. Appliers report through [`Outcome`] and never panic or
//! return errors; a missing file is a warning, a failed write is a failure.
//!
//! ```text
//! NetworkFunctionProcessor<C>
//!     |
//!     | configure(&C)
//!     v
//! ConfigApplier<C> --> ConfigFileEditor (key = "value" substitution)
//!                  --> HostsFile        (ip host lines)
//!                  --> CertificateIssuer (external script)
//! ```

pub mod certificate;
pub mod config_file;
pub mod hosts;

use async_trait::async_trait;

use crate::outcome::Outcome;

pub use certificate::CertificateIssuer;
pub use config_file::{ConfigFileEditor, Substitution};
pub use hosts::HostsFile;

/// Applies a typed configuration record to the local system.
///
/// Implementations must be idempotent: applying the same record twice
/// leaves the system as applying it once does.
#[async_trait]
pub trait ConfigApplier<C>: Send + Sync
where
    C: Sync,
{
    async fn configure(&self, config: &C) -> Outcome;
}
