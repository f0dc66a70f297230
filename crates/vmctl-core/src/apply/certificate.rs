//! Diameter certificate generation through an external script.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, warn};

use crate::outcome::Outcome;

/// Runs `<executable> <cert_dir> <host_name>` to (re)issue the certificate
/// for a host. A leading `~/` in the executable is expanded from `$HOME`.
#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    executable: String,
    cert_dir: PathBuf,
}

impl CertificateIssuer {
    pub fn new(executable: impl Into<String>, cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            cert_dir: cert_dir.into(),
        }
    }

    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    pub async fn issue(&self, host_name: &str) -> Outcome {
        let program = expand_home(&self.executable);
        let result = Command::new(&program)
            .arg(&self.cert_dir)
            .arg(host_name)
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                info!(host_name, cert_dir = %self.cert_dir.display(), "certificate issued");
                Outcome::ok(format!("certificate issued for {host_name}"))
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
                warn!(host_name, status = %output.status, stderr = %stderr, "certificate script failed");
                Outcome::fail(format!(
                    "certificate script exited with {} for {host_name}",
                    output.status
                ))
                .with_detail("stderr", stderr)
            }
            Err(e) => {
                warn!(program = %program.display(), error = %e, "failed to run certificate script");
                Outcome::fail(format!("failed to run {}: {e}", program.display()))
            }
        }
    }
}

fn expand_home(executable: &str) -> PathBuf {
    match (executable.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(executable),
    }
}
