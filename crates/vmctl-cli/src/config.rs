//! Configuration files for vmctl.
//!
//! Two kinds of TOML file are read here:
//!
//! - agent configuration (`vmctl agent -c FILE...`), merged in order, with
//!   the default at `~/.config/vmctl/agent.toml`, and the resolution chain
//!   CLI flag > env var > config file > default;
//! - rollout files (`vmctl rollout FILE`) listing the targets to bring up.

use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vmctl_core::processor::ProcessorSettings;
use vmctl_core::supervisor::{RolloutConfig, Target};
use vmctl_core::{BraceMode, Message};

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 38388;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} in env var {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("rollout file lists no targets")]
    NoTargets,

    #[error("target {0:?} is listed more than once")]
    DuplicateTarget(String),
}

// -----------------------------------------------------------------------
// Agent config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AgentConfigFile {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub framing: FramingSection,
    #[serde(default)]
    pub processors: BTreeMap<String, ProcessorSettings>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NetworkSection {
    pub address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FramingSection {
    pub mode: Option<BraceMode>,
}

impl AgentConfigFile {
    /// Fold `other` into `self`: set fields of `other` win, processors are
    /// added or replaced by name.
    pub fn merge(&mut self, other: AgentConfigFile) {
        if other.network.address.is_some() {
            self.network.address = other.network.address;
        }
        if other.network.port.is_some() {
            self.network.port = other.network.port;
        }
        if other.framing.mode.is_some() {
            self.framing.mode = other.framing.mode;
        }
        self.processors.extend(other.processors);
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the vmctl config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/vmctl` or `~/.config/vmctl`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("vmctl");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("vmctl")
}

/// Return the path to the default agent config file.
pub fn agent_config_path() -> PathBuf {
    config_dir().join("agent.toml")
}

// -----------------------------------------------------------------------
// Read
// -----------------------------------------------------------------------

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and merge agent config files in order.
///
/// With no explicit files, the default file is read if it exists; a
/// missing default is not an error.
pub fn load_agent_files(paths: &[PathBuf]) -> Result<AgentConfigFile, ConfigError> {
    let mut merged = AgentConfigFile::default();
    if paths.is_empty() {
        let default = agent_config_path();
        if default.is_file() {
            merged.merge(read_toml(&default)?);
        }
        return Ok(merged);
    }
    for path in paths {
        merged.merge(read_toml(path)?);
    }
    Ok(merged)
}

// -----------------------------------------------------------------------
// Resolved agent config
// -----------------------------------------------------------------------

/// Values given on the command line; `None` means not given.
#[derive(Debug, Default)]
pub struct AgentOverrides {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub framing: Option<BraceMode>,
}

/// Fully resolved agent configuration, ready for use.
#[derive(Debug)]
pub struct AgentConfig {
    pub address: String,
    pub port: u16,
    pub framing: BraceMode,
    /// Processors in registration order (sorted by name).
    pub processors: Vec<(String, ProcessorSettings)>,
}

impl AgentConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Address: `--address` > `VMCTL_ADDRESS` > `[network] address` > `0.0.0.0`
    /// - Port: `--port` > `VMCTL_PORT` > `[network] port` > `38388`
    /// - Framing: `--framing` > `[framing] mode` > lexical
    pub fn resolve(file: AgentConfigFile, cli: AgentOverrides) -> Result<Self, ConfigError> {
        let address = if let Some(address) = cli.address {
            address
        } else if let Ok(address) = std::env::var("VMCTL_ADDRESS") {
            address
        } else if let Some(address) = file.network.address {
            address
        } else {
            DEFAULT_ADDRESS.to_string()
        };

        let port = if let Some(port) = cli.port {
            port
        } else if let Ok(value) = std::env::var("VMCTL_PORT") {
            value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "VMCTL_PORT",
                value,
            })?
        } else {
            file.network.port.unwrap_or(DEFAULT_PORT)
        };

        let framing = cli.framing.or(file.framing.mode).unwrap_or_default();

        Ok(Self {
            address,
            port,
            framing,
            processors: file.processors.into_iter().collect(),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// -----------------------------------------------------------------------
// Rollout file
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct RolloutFile {
    #[serde(default)]
    pub rollout: RolloutSection,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RolloutSection {
    /// Port used for target addresses that do not name one.
    pub port: Option<u16>,
    pub connect_timeout_secs: Option<u64>,
    pub phase_timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TargetEntry {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub config: Message,
}

/// Load a rollout file into targets and timeouts.
pub fn load_rollout(path: &Path) -> Result<(Vec<Target>, RolloutConfig), ConfigError> {
    let file: RolloutFile = read_toml(path)?;
    file.into_rollout()
}

impl RolloutFile {
    pub fn into_rollout(self) -> Result<(Vec<Target>, RolloutConfig), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let port = self.rollout.port.unwrap_or(DEFAULT_PORT);
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.targets.len());
        for entry in self.targets {
            if !seen.insert(entry.name.clone()) {
                return Err(ConfigError::DuplicateTarget(entry.name));
            }
            targets.push(Target {
                address: with_default_port(&entry.address, port),
                name: entry.name,
                config: entry.config,
            });
        }

        let defaults = RolloutConfig::default();
        let config = RolloutConfig {
            connect_timeout: self
                .rollout
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            phase_timeout: self
                .rollout
                .phase_timeout_secs
                .map_or(defaults.phase_timeout, Duration::from_secs),
        };
        Ok((targets, config))
    }
}

/// Append `port` unless `address` already names one. Bare IPv6 literals
/// get brackets.
fn with_default_port(address: &str, port: u16) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }
    match address.rsplit_once(':') {
        Some((host, p)) if !host.is_empty() && p.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{address}:{port}"),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
