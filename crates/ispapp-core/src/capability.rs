// ── Host capabilities ──
//
// Process execution and file access go through these traits so handlers and
// probes run against fakes in tests and the real host in production.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::HandlerError;

/// Captured result of one process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// A non-zero exit is not an error; spawn failures and timeouts are.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HandlerError>;
}

/// Runs commands with `tokio::process`, killing them after `timeout`.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HandlerError> {
        debug!(program, ?args, "spawning command");
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HandlerError::Command(format!("{program}: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| HandlerError::CommandTimeout {
                program: program.to_owned(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| HandlerError::Command(format!("{program}: {e}")))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

#[async_trait]
pub trait FileReader: Send + Sync {
    /// Whole file as text, or `None` if it does not exist or is unreadable.
    async fn read_to_string(&self, path: &Path) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsFileReader;

#[async_trait]
impl FileReader for FsFileReader {
    async fn read_to_string(&self, path: &Path) -> Option<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "file unavailable");
                None
            }
        }
    }
}
