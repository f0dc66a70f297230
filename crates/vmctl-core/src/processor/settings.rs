//! Processor settings as read from the agent configuration, and the
//! factory that turns them into registered processors.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Processor;
use super::log::LogProcessor;
use super::registry::RegistryError;
use crate::roles::{hss, mme, spgw};

/// The processor implementations an agent can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    Mme,
    Hss,
    Spgw,
    Log,
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mme => "mme",
            Self::Hss => "hss",
            Self::Spgw => "spgw",
            Self::Log => "log",
        };
        f.write_str(s)
    }
}

impl FromStr for ProcessorKind {
    type Err = ProcessorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mme" => Ok(Self::Mme),
            "hss" => Ok(Self::Hss),
            "spgw" => Ok(Self::Spgw),
            "log" => Ok(Self::Log),
            other => Err(ProcessorKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProcessorKind`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid processor kind: {0:?} (expected mme, hss, spgw or log)")]
pub struct ProcessorKindParseError(pub String);

/// One `[processors.<name>]` table.
///
/// `kind` is kept as text so that an unknown kind surfaces as a
/// [`RegistryError::UnknownKind`] naming the processor. Paths left unset
/// fall back to the role's standard locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSettings {
    pub kind: String,
    /// Shell command that runs the network function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fd_config_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_dir: Option<PathBuf>,
}

impl ProcessorSettings {
    pub fn of_kind(kind: ProcessorKind) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    pub fn parsed_kind(&self) -> Result<ProcessorKind, ProcessorKindParseError> {
        self.kind.parse()
    }
}

/// Build the processor described by `settings`, named `name`.
pub fn build_processor(
    name: &str,
    settings: &ProcessorSettings,
) -> Result<Arc<dyn Processor>, RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    let kind = settings
        .parsed_kind()
        .map_err(|_| RegistryError::UnknownKind {
            name: name.to_owned(),
            kind: settings.kind.clone(),
        })?;

    let processor: Arc<dyn Processor> = match kind {
        ProcessorKind::Mme => Arc::new(mme::processor(name, settings)),
        ProcessorKind::Hss => Arc::new(hss::processor(name, settings)),
        ProcessorKind::Spgw => Arc::new(spgw::processor(name, settings)),
        ProcessorKind::Log => Arc::new(LogProcessor::new(name)),
    };
    Ok(processor)
}
