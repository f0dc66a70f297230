//! Field parsers shared by the role-specific message parsers.
//!
//! Each parser reads one concern out of a decoded [`Message`] and never
//! fails the whole message: an absent field is `None`, a present but
//! malformed field is logged and also `None`. A field supplied as an empty
//! string stays `Some("")`.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::Message;

pub const MSG_HOSTS: &str = "hosts";
pub const MSG_HOST_NAME: &str = "host_name";
pub const MSG_IP_ADDRESS: &str = "ip";
pub const MSG_COMMAND: &str = "command";

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Lifecycle command understood by every role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Start,
    Stop,
    Restart,
    Status,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Status => "status",
        };
        f.write_str(s)
    }
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "status" => Ok(Self::Status),
            other => Err(CommandParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Command`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid command: {0:?} (expected start, stop, restart or status)")]
pub struct CommandParseError(pub String);

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// An IPv4 address with a prefix length, written `a.b.c.d/len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CidrParseError(s.to_owned());
        let (addr, prefix) = s.split_once('/').ok_or_else(err)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| err())?;
        let prefix: u8 = prefix.parse().map_err(|_| err())?;
        if prefix > 32 {
            return Err(err());
        }
        Ok(Self { addr, prefix })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid IPv4 address with mask: {0:?} (expected a.b.c.d/len)")]
pub struct CidrParseError(pub String);

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

/// One `hosts.<role>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub host_name: String,
    pub ip: Ipv4Cidr,
}

/// All valid entries of the `hosts` object, keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostsConfig {
    pub entries: BTreeMap<String, HostEntry>,
}

impl HostsConfig {
    pub fn get(&self, role: &str) -> Option<&HostEntry> {
        self.entries.get(role)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse the `hosts` object. Incomplete or invalid entries are dropped.
pub fn parse_hosts(msg: &Message) -> HostsConfig {
    let mut hosts = HostsConfig::default();

    let Some(value) = msg.get(MSG_HOSTS) else {
        return hosts;
    };
    let Some(roles) = value.as_object() else {
        warn!(value = %value, "hosts is not an object, ignoring it");
        return hosts;
    };

    for (role, entry) in roles {
        if let Some(parsed) = parse_host_entry(role, entry) {
            info!(
                role = %role,
                host_name = %parsed.host_name,
                ip = %parsed.ip,
                "got host configuration"
            );
            hosts.entries.insert(role.clone(), parsed);
        }
    }

    hosts
}

fn parse_host_entry(role: &str, entry: &Value) -> Option<HostEntry> {
    let Some(host_name) = entry.get(MSG_HOST_NAME).and_then(Value::as_str) else {
        warn!(role, key = MSG_HOST_NAME, "host configuration is not complete, no host name given");
        return None;
    };
    let Some(ip) = entry.get(MSG_IP_ADDRESS).and_then(Value::as_str) else {
        warn!(role, key = MSG_IP_ADDRESS, "host configuration is not complete, no IP address given");
        return None;
    };
    match ip.parse::<Ipv4Cidr>() {
        Ok(ip) => Some(HostEntry {
            host_name: host_name.to_owned(),
            ip,
        }),
        Err(e) => {
            warn!(role, error = %e, "got invalid IP address");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Scalar fields
// ---------------------------------------------------------------------------

/// Parse the `command` field.
pub fn parse_command(msg: &Message) -> Option<Command> {
    let value = msg.get(MSG_COMMAND)?;
    let parsed = value.as_str().map(str::parse::<Command>);
    match parsed {
        Some(Ok(command)) => {
            info!(%command, "got command");
            Some(command)
        }
        Some(Err(e)) => {
            warn!(error = %e, "got invalid command");
            None
        }
        None => {
            warn!(value = %value, "command is not a string, ignoring it");
            None
        }
    }
}

/// Read a string field. Non-string values are logged and ignored.
pub fn parse_text(msg: &Message, key: &str) -> Option<String> {
    let value = msg.get(key)?;
    match value.as_str() {
        Some(s) => {
            info!(key, value = s, "got configuration value");
            Some(s.to_owned())
        }
        None => {
            warn!(key, value = %value, "expected a string, ignoring field");
            None
        }
    }
}

/// Read an `a.b.c.d/len` field. Malformed values are logged and ignored.
pub fn parse_cidr(msg: &Message, key: &str) -> Option<Ipv4Cidr> {
    let text = parse_text(msg, key)?;
    match text.parse() {
        Ok(cidr) => Some(cidr),
        Err(e) => {
            warn!(key, error = %e, "got invalid IP address");
            None
        }
    }
}
