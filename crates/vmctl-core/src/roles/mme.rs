//! MME role: `mme.conf`, the freeDiameter client config and the hosts table.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{NetworkFunctionProcessor, RoleConfig};
use crate::Message;
use crate::apply::hosts::DEFAULT_HOSTS_PATH;
use crate::apply::{ConfigApplier, ConfigFileEditor, HostsFile, Substitution};
use crate::message::{Command, HostsConfig, parse_command, parse_hosts, parse_text};
use crate::outcome::{Outcome, combine};
use crate::processor::ProcessorSettings;
use crate::runner::Runner;

pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/oai/mme.conf";
pub const DEFAULT_FD_CONFIG_PATH: &str = "/usr/local/etc/oai/freeDiameter/mme_fd.conf";
pub const DEFAULT_EXECUTABLE: &str = "~/openair-cn/SCRIPTS/run_mme";

pub const MSG_S11_INTERFACE: &str = "s11_interface";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MmeConfig {
    /// Uses the `mme`, `hss` and `spgw` entries.
    pub hosts: HostsConfig,
    pub s11_interface: Option<String>,
    pub command: Option<Command>,
}

impl RoleConfig for MmeConfig {
    const ROLE: &'static str = "mme";

    fn parse(msg: &Message) -> Self {
        Self {
            hosts: parse_hosts(msg),
            s11_interface: parse_text(msg, MSG_S11_INTERFACE),
            command: parse_command(msg),
        }
    }

    fn command(&self) -> Option<Command> {
        self.command
    }
}

#[derive(Debug, Clone)]
pub struct MmeApplier {
    mme_conf: ConfigFileEditor,
    fd_conf: ConfigFileEditor,
    hosts: HostsFile,
}

impl MmeApplier {
    pub fn new(
        config_path: impl Into<PathBuf>,
        fd_config_path: impl Into<PathBuf>,
        hosts_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mme_conf: ConfigFileEditor::new(config_path),
            fd_conf: ConfigFileEditor::new(fd_config_path),
            hosts: HostsFile::new(hosts_path),
        }
    }

    fn mme_rules(config: &MmeConfig) -> Result<Vec<Substitution>, regex::Error> {
        let mut rules = Vec::new();
        if let Some(interface) = &config.s11_interface {
            rules.push(Substitution::quoted("MME_INTERFACE_NAME_FOR_S11_MME", interface)?);
        }
        if let Some(mme) = config.hosts.get("mme") {
            let ip = mme.ip.to_string();
            rules.push(Substitution::quoted("MME_IPV4_ADDRESS_FOR_S11_MME", &ip)?);
            rules.push(Substitution::quoted("MME_IPV4_ADDRESS_FOR_S1_MME", &ip)?);
        }
        if let Some(spgw) = config.hosts.get("spgw") {
            rules.push(Substitution::quoted("SGW_IPV4_ADDRESS_FOR_S11", spgw.ip.to_string())?);
        }
        Ok(rules)
    }

    fn fd_rules(config: &MmeConfig) -> Result<Vec<Substitution>, regex::Error> {
        let mut rules = Vec::new();
        if let Some(mme) = config.hosts.get("mme") {
            rules.push(Substitution::quoted("Identity", &mme.host_name)?);
        }
        if let Some(hss) = config.hosts.get("hss") {
            rules.push(Substitution::quoted("ConnectPeer", &hss.host_name)?);
        }
        Ok(rules)
    }
}

#[async_trait]
impl ConfigApplier<MmeConfig> for MmeApplier {
    async fn configure(&self, config: &MmeConfig) -> Outcome {
        let rules =
            Self::mme_rules(config).and_then(|mme| Self::fd_rules(config).map(|fd| (mme, fd)));
        let (mme_rules, fd_rules) = match rules {
            Ok(rules) => rules,
            Err(e) => return Outcome::fail(format!("invalid substitution rule: {e}")),
        };

        combine([
            ("mme.conf", self.mme_conf.apply(&mme_rules)),
            ("mme_fd.conf", self.fd_conf.apply(&fd_rules)),
            ("hosts", self.hosts.apply(&config.hosts)),
        ])
    }
}

/// Build an MME processor, filling unset paths with the standard ones.
pub fn processor(name: &str, settings: &ProcessorSettings) -> NetworkFunctionProcessor<MmeConfig> {
    let applier = MmeApplier::new(
        settings.config_path.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.into()),
        settings.fd_config_path.clone().unwrap_or_else(|| DEFAULT_FD_CONFIG_PATH.into()),
        settings.hosts_path.clone().unwrap_or_else(|| DEFAULT_HOSTS_PATH.into()),
    );
    let runner = Runner::new(settings.executable.as_deref().unwrap_or(DEFAULT_EXECUTABLE));
    NetworkFunctionProcessor::new(name, applier, Arc::new(runner))
}
