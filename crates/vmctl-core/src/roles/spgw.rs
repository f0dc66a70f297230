//! SPGW role: interfaces and addresses in `spgw.conf`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{NetworkFunctionProcessor, RoleConfig};
use crate::Message;
use crate::apply::{ConfigApplier, ConfigFileEditor, Substitution};
use crate::message::{Command, Ipv4Cidr, parse_cidr, parse_command, parse_text};
use crate::outcome::{Outcome, combine};
use crate::processor::ProcessorSettings;
use crate::runner::Runner;

pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/oai/spgw.conf";
pub const DEFAULT_EXECUTABLE: &str = "~/openair-cn/SCRIPTS/run_spgw";

pub const MSG_S11_INTERFACE: &str = "s11_interface";
pub const MSG_S11_IP: &str = "s11_ip";
pub const MSG_SGI_INTERFACE: &str = "sgi_interface";
pub const MSG_S1U_IP: &str = "s1u_ip";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpgwConfig {
    pub s11_interface: Option<String>,
    pub s11_ip: Option<Ipv4Cidr>,
    pub sgi_interface: Option<String>,
    pub s1u_ip: Option<Ipv4Cidr>,
    pub command: Option<Command>,
}

impl RoleConfig for SpgwConfig {
    const ROLE: &'static str = "spgw";

    fn parse(msg: &Message) -> Self {
        Self {
            s11_interface: parse_text(msg, MSG_S11_INTERFACE),
            s11_ip: parse_cidr(msg, MSG_S11_IP),
            sgi_interface: parse_text(msg, MSG_SGI_INTERFACE),
            s1u_ip: parse_cidr(msg, MSG_S1U_IP),
            command: parse_command(msg),
        }
    }

    fn command(&self) -> Option<Command> {
        self.command
    }
}

#[derive(Debug, Clone)]
pub struct SpgwApplier {
    spgw_conf: ConfigFileEditor,
}

impl SpgwApplier {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            spgw_conf: ConfigFileEditor::new(config_path),
        }
    }

    fn rules(config: &SpgwConfig) -> Result<Vec<Substitution>, regex::Error> {
        let fields = [
            ("SGW_INTERFACE_NAME_FOR_S11", config.s11_interface.clone()),
            ("SGW_IPV4_ADDRESS_FOR_S11", config.s11_ip.map(|ip| ip.to_string())),
            ("PGW_INTERFACE_NAME_FOR_SGI", config.sgi_interface.clone()),
            ("SGW_IPV4_ADDRESS_FOR_S1U_S12_S4_UP", config.s1u_ip.map(|ip| ip.to_string())),
        ];
        fields
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| Substitution::quoted(key, value)))
            .collect()
    }
}

#[async_trait]
impl ConfigApplier<SpgwConfig> for SpgwApplier {
    async fn configure(&self, config: &SpgwConfig) -> Outcome {
        match Self::rules(config) {
            Ok(rules) => combine([("spgw.conf", self.spgw_conf.apply(&rules))]),
            Err(e) => Outcome::fail(format!("invalid substitution rule: {e}")),
        }
    }
}

/// Build an SPGW processor, filling unset paths with the standard ones.
pub fn processor(name: &str, settings: &ProcessorSettings) -> NetworkFunctionProcessor<SpgwConfig> {
    let applier =
        SpgwApplier::new(settings.config_path.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.into()));
    let runner = Runner::new(settings.executable.as_deref().unwrap_or(DEFAULT_EXECUTABLE));
    NetworkFunctionProcessor::new(name, applier, Arc::new(runner))
}
