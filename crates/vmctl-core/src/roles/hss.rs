//! HSS role: database credentials, hosts table and the S6a certificate.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{NetworkFunctionProcessor, RoleConfig};
use crate::Message;
use crate::apply::hosts::DEFAULT_HOSTS_PATH;
use crate::apply::{CertificateIssuer, ConfigApplier, ConfigFileEditor, HostsFile, Substitution};
use crate::message::{Command, HostsConfig, parse_command, parse_hosts};
use crate::outcome::{Outcome, combine};
use crate::processor::ProcessorSettings;
use crate::runner::Runner;

pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/oai/hss.conf";
pub const DEFAULT_CERT_EXECUTABLE: &str = "~/openair-cn/SCRIPTS/check_hss_s6a_certificate";
pub const DEFAULT_CERT_DIR: &str = "/usr/local/etc/oai/freeDiameter";
pub const DEFAULT_EXECUTABLE: &str = "~/openair-cn/SCRIPTS/run_hss";

pub const MSG_MYSQL: &str = "mysql";
pub const MSG_MYSQL_USER: &str = "user";
pub const MSG_MYSQL_PASS: &str = "pass";

#[derive(Clone, PartialEq, Eq)]
pub struct MysqlCredentials {
    pub user: String,
    pub pass: String,
}

impl std::fmt::Debug for MysqlCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlCredentials")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HssConfig {
    pub hosts: HostsConfig,
    pub mysql: Option<MysqlCredentials>,
    pub command: Option<Command>,
}

impl RoleConfig for HssConfig {
    const ROLE: &'static str = "hss";

    fn parse(msg: &Message) -> Self {
        Self {
            hosts: parse_hosts(msg),
            mysql: parse_mysql(msg),
            command: parse_command(msg),
        }
    }

    fn command(&self) -> Option<Command> {
        self.command
    }
}

/// Both `user` and `pass` must be strings, otherwise the credentials are
/// left unset.
fn parse_mysql(msg: &Message) -> Option<MysqlCredentials> {
    let mysql = msg.get(MSG_MYSQL)?;
    let field = |key: &str| mysql.get(key).and_then(Value::as_str).map(str::to_owned);
    match (field(MSG_MYSQL_USER), field(MSG_MYSQL_PASS)) {
        (Some(user), Some(pass)) => {
            info!(user = %user, "got MySQL credentials");
            Some(MysqlCredentials { user, pass })
        }
        _ => {
            warn!("MySQL configuration needs both user and pass, ignoring it");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct HssApplier {
    hss_conf: ConfigFileEditor,
    hosts: HostsFile,
    issuer: CertificateIssuer,
}

impl HssApplier {
    pub fn new(
        config_path: impl Into<PathBuf>,
        hosts_path: impl Into<PathBuf>,
        issuer: CertificateIssuer,
    ) -> Self {
        Self {
            hss_conf: ConfigFileEditor::new(config_path),
            hosts: HostsFile::new(hosts_path),
            issuer,
        }
    }

    fn rules(config: &HssConfig) -> Result<Vec<Substitution>, regex::Error> {
        let Some(mysql) = &config.mysql else {
            return Ok(Vec::new());
        };
        Ok(vec![
            Substitution::quoted("MYSQL_user", &mysql.user)?,
            Substitution::quoted("MYSQL_pass", &mysql.pass)?,
        ])
    }

    async fn certificate(&self, config: &HssConfig) -> Outcome {
        match config.hosts.get("hss") {
            Some(hss) => self.issuer.issue(&hss.host_name).await,
            None => Outcome::ok("no hss host name given, certificate unchanged"),
        }
    }
}

#[async_trait]
impl ConfigApplier<HssConfig> for HssApplier {
    async fn configure(&self, config: &HssConfig) -> Outcome {
        let rules = match Self::rules(config) {
            Ok(rules) => rules,
            Err(e) => return Outcome::fail(format!("invalid substitution rule: {e}")),
        };

        let hss_conf = self.hss_conf.apply(&rules);
        let hosts = self.hosts.apply(&config.hosts);
        let certificate = self.certificate(config).await;
        combine([
            ("hss.conf", hss_conf),
            ("hosts", hosts),
            ("certificate", certificate),
        ])
    }
}

/// Build an HSS processor, filling unset paths with the standard ones.
pub fn processor(name: &str, settings: &ProcessorSettings) -> NetworkFunctionProcessor<HssConfig> {
    let issuer = CertificateIssuer::new(
        settings.cert_executable.as_deref().unwrap_or(DEFAULT_CERT_EXECUTABLE),
        settings.cert_dir.clone().unwrap_or_else(|| DEFAULT_CERT_DIR.into()),
    );
    let applier = HssApplier::new(
        settings.config_path.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.into()),
        settings.hosts_path.clone().unwrap_or_else(|| DEFAULT_HOSTS_PATH.into()),
        issuer,
    );
    let runner = Runner::new(settings.executable.as_deref().unwrap_or(DEFAULT_EXECUTABLE));
    NetworkFunctionProcessor::new(name, applier, Arc::new(runner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Status;
    use serde_json::json;

    fn msg(value: Value) -> Message {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn mysql_needs_user_and_pass() {
        let full = HssConfig::parse(&msg(json!({"mysql": {"user": "root", "pass": "secret"}})));
        assert_eq!(full.mysql.as_ref().map(|m| m.user.as_str()), Some("root"));

        let partial = HssConfig::parse(&msg(json!({"mysql": {"user": "root"}})));
        assert!(partial.mysql.is_none());

        let wrong_type = HssConfig::parse(&msg(json!({"mysql": {"user": "root", "pass": 1}})));
        assert!(wrong_type.mysql.is_none());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = MysqlCredentials {
            user: "root".into(),
            pass: "secret".into(),
        };
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[tokio::test]
    async fn configure_writes_credentials_and_issues_certificate() {
        let tmp = tempfile::tempdir().unwrap();
        let conf = tmp.path().join("hss.conf");
        let hosts = tmp.path().join("hosts");
        std::fs::write(
            &conf,
            "MYSQL_server = \"127.0.0.1\";\nMYSQL_user   = \"@MYSQL_user@\";\nMYSQL_pass   = \"@MYSQL_pass@\";\n",
        )
        .unwrap();
        std::fs::write(&hosts, "127.0.0.1 localhost\n").unwrap();

        let applier = HssApplier::new(&conf, &hosts, CertificateIssuer::new("true", tmp.path()));
        let config = HssConfig::parse(&msg(json!({
            "hosts": {"hss": {"host_name": "hss.local", "ip": "10.0.0.2/24"}},
            "mysql": {"user": "root", "pass": "linux"}
        })));
        let outcome = applier.configure(&config).await;
        assert!(outcome.is_ok(), "{outcome}");
        assert_eq!(outcome.detail("certificate"), Some("certificate issued for hss.local"));

        let content = std::fs::read_to_string(&conf).unwrap();
        assert!(content.contains("MYSQL_user   = \"root\";"));
        assert!(content.contains("MYSQL_pass   = \"linux\";"));
        assert!(content.contains("MYSQL_server = \"127.0.0.1\";"));
    }

    #[tokio::test]
    async fn failing_certificate_fails_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let hosts = tmp.path().join("hosts");
        std::fs::write(&hosts, "").unwrap();

        let applier = HssApplier::new(
            tmp.path().join("hss.conf"),
            &hosts,
            CertificateIssuer::new("false", tmp.path()),
        );
        let config = HssConfig::parse(&msg(json!({
            "hosts": {"hss": {"host_name": "hss.local", "ip": "10.0.0.2/24"}}
        })));
        let outcome = applier.configure(&config).await;
        assert_eq!(outcome.status, Status::Failed);
    }
}
