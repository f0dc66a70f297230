//! Child process control for a network-function role.
//!
//! [`ProcessController`] is the seam processors call to start, stop and
//! query the managed process. [`Runner`] implements it by running a shell
//! command with stdout and stderr captured into an in-memory buffer.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// Lifecycle control over one external child process.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Start the process. Starting an already running process is a no-op.
    async fn start(&self) -> Result<()>;

    /// Stop the process. Stopping a process that is not running is a no-op.
    async fn stop(&self) -> Result<()>;

    /// Stop the process if it is running, then start it.
    async fn restart(&self) -> Result<()>;

    /// Whether the process is still alive.
    async fn is_running(&self) -> bool;

    /// Output captured so far, with line breaks removed.
    async fn output(&self) -> String;
}

// Compile-time assertion: ProcessController must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ProcessController) {}
};

/// Runs `sh -c <command>` and keeps its combined output.
pub struct Runner {
    command: String,
    grace: Duration,
    child: Mutex<Option<Child>>,
    output: Arc<Mutex<String>>,
    span: Span,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("command", &self.command)
            .finish()
    }
}

impl Runner {
    /// Time given to the process to exit after SIGTERM before SIGKILL.
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let span = info_span!("runner", command = %command);
        Self {
            command,
            grace: Self::DEFAULT_GRACE,
            child: Mutex::new(None),
            output: Arc::new(Mutex::new(String::new())),
            span,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn capture<R>(&self, pipe: Option<R>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let Some(pipe) = pipe else {
            return;
        };
        let output = Arc::clone(&self.output);
        tokio::spawn(
            async move {
                let mut lines = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "process output");
                    output.lock().await.push_str(line.trim_end_matches('\r'));
                }
            }
            .instrument(self.span.clone()),
        );
    }

    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid belongs to a child we spawned and have not reaped.
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
                }
            }
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "process exited"),
            _ => {
                debug!("process did not exit after SIGTERM, sending SIGKILL");
                let _ = child.kill().await;
            }
        }
    }
}

#[async_trait]
impl ProcessController for Runner {
    async fn start(&self) -> Result<()> {
        let mut slot = self.child.lock().await;

        if let Some(child) = slot.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                warn!(parent: &self.span, "unable to start process, it is already running");
                return Ok(());
            }
        }

        self.output.lock().await.clear();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {:?}", self.command))?;

        self.capture(child.stdout.take());
        self.capture(child.stderr.take());

        info!(parent: &self.span, pid = ?child.id(), "process started");
        *slot = Some(child);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut slot = self.child.lock().await;
        let Some(mut child) = slot.take() else {
            warn!(parent: &self.span, "unable to stop process, it is not started");
            return Ok(());
        };
        self.terminate(&mut child).instrument(self.span.clone()).await;
        info!(parent: &self.span, "process stopped");
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        if self.is_running().await {
            self.stop().await?;
        }
        self.start().await
    }

    async fn is_running(&self) -> bool {
        let mut slot = self.child.lock().await;
        match slot.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!(parent: &self.span, %status, "process has exited");
                false
            }
            Some(Err(e)) => {
                warn!(parent: &self.span, error = %e, "failed to poll process");
                false
            }
            None => false,
        }
    }

    async fn output(&self) -> String {
        self.output.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_for_exit(runner: &Runner) {
        for _ in 0..100 {
            if !runner.is_running().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("process did not exit in time");
    }

    #[tokio::test]
    async fn captures_output() {
        let runner = Runner::new("echo Test text");
        runner.start().await.unwrap();
        wait_for_exit(&runner).await;
        // Give the reader task a moment to drain the pipe.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(runner.output().await.contains("Test text"));
    }

    #[tokio::test]
    async fn stop_terminates_long_running_process() {
        let runner = Runner::new("sleep 3600").with_grace(Duration::from_millis(500));
        runner.start().await.unwrap();
        assert!(runner.is_running().await);
        runner.stop().await.unwrap();
        assert!(!runner.is_running().await);
    }

    #[tokio::test]
    async fn start_twice_keeps_first_process() {
        let runner = Runner::new("sleep 3600").with_grace(Duration::from_millis(500));
        runner.start().await.unwrap();
        runner.start().await.unwrap();
        assert!(runner.is_running().await);
        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let runner = Runner::new("true");
        runner.stop().await.unwrap();
        assert!(!runner.is_running().await);
    }

    #[tokio::test]
    async fn restart_starts_when_not_running() {
        let runner = Runner::new("sleep 3600").with_grace(Duration::from_millis(500));
        runner.restart().await.unwrap();
        assert!(runner.is_running().await);
        runner.restart().await.unwrap();
        assert!(runner.is_running().await);
        runner.stop().await.unwrap();
    }
}
