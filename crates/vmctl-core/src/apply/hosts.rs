//! The system hosts table.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::config_file::replace_with_backup;
use crate::message::HostsConfig;
use crate::outcome::Outcome;

pub const DEFAULT_HOSTS_PATH: &str = "/etc/hosts";

/// Keeps `<ip> <host_name>` lines in a hosts file in sync with a
/// [`HostsConfig`].
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
}

impl Default for HostsFile {
    fn default() -> Self {
        Self::new(DEFAULT_HOSTS_PATH)
    }
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line per host entry.
    ///
    /// The first non-comment line naming either the host or its address is
    /// replaced; entries with no such line are appended.
    pub fn apply(&self, hosts: &HostsConfig) -> Outcome {
        if hosts.is_empty() {
            return Outcome::ok("no hosts to configure");
        }
        if !self.path.is_file() {
            warn!(path = %self.path.display(), "hosts file is not found");
            return Outcome::warn(format!("hosts file not found at {}", self.path.display()));
        }

        let original = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                return Outcome::fail(format!("failed to read {}: {e}", self.path.display()));
            }
        };

        let wanted: Vec<(Ipv4Addr, &str)> = hosts
            .entries
            .values()
            .map(|entry| (entry.ip.addr, entry.host_name.as_str()))
            .collect();
        let updated = rewrite(&original, &wanted);

        if updated == original {
            debug!(path = %self.path.display(), "hosts file already up to date");
            return Outcome::ok("hosts file already up to date");
        }
        replace_with_backup(&self.path, &updated)
    }
}

fn rewrite(original: &str, wanted: &[(Ipv4Addr, &str)]) -> String {
    let mut lines: Vec<String> = original.lines().map(str::to_owned).collect();
    let mut claimed = vec![false; lines.len()];

    for (ip, host) in wanted {
        let entry = format!("{ip} {host}");
        let ip_text = ip.to_string();

        let slot = lines.iter().enumerate().position(|(i, line)| {
            !claimed[i] && names_entry(line, &ip_text, host)
        });
        match slot {
            Some(i) => {
                lines[i] = entry;
                claimed[i] = true;
            }
            None => {
                lines.push(entry);
                claimed.push(true);
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn names_entry(line: &str, ip: &str, host: &str) -> bool {
    let line = line.trim_start();
    if line.starts_with('#') {
        return false;
    }
    let mut fields = line.split_whitespace();
    match fields.next() {
        Some(first) if first == ip => true,
        Some(_) => fields.any(|name| name == host),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HostEntry;

    fn hosts(entries: &[(&str, &str, &str)]) -> HostsConfig {
        let mut config = HostsConfig::default();
        for (role, name, ip) in entries {
            config.entries.insert(
                role.to_string(),
                HostEntry {
                    host_name: name.to_string(),
                    ip: ip.parse().unwrap(),
                },
            );
        }
        config
    }

    #[test]
    fn replaces_matching_lines_and_appends_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hosts");
        std::fs::write(
            &path,
            "127.0.0.1 localhost\n# 10.0.0.9 mme.local\n10.0.0.9 mme.local mme\n",
        )
        .unwrap();

        let outcome = HostsFile::new(&path).apply(&hosts(&[
            ("mme", "mme.local", "10.0.0.1/24"),
            ("hss", "hss.local", "10.0.0.2/24"),
        ]));
        assert!(outcome.is_ok(), "{outcome}");

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "127.0.0.1 localhost\n# 10.0.0.9 mme.local\n10.0.0.1 mme.local\n10.0.0.2 hss.local\n"
        );
    }

    #[test]
    fn second_apply_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost\n").unwrap();
        let file = HostsFile::new(&path);
        let config = hosts(&[("spgw", "spgw.local", "10.0.0.3/8")]);

        file.apply(&config);
        let first = std::fs::read_to_string(&path).unwrap();
        let outcome = file.apply(&config);
        assert_eq!(outcome.message, "hosts file already up to date");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn missing_hosts_file_is_a_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome =
            HostsFile::new(tmp.path().join("hosts")).apply(&hosts(&[("mme", "m", "1.1.1.1/8")]));
        assert_eq!(outcome.status, crate::outcome::Status::Warning);
    }
}
