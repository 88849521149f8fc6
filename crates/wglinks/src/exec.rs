//! Remote command execution.
//!
//! Key uploads and service control run as shell scripts on the target
//! machine. [`CommandRunner`] is the seam to whatever transport the
//! deployment uses; [`SshRunner`] is the default and [`FakeRunner`] records
//! scripts for tests.

use std::borrow::Cow;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, WgLinksError};
use crate::fleet::Endpoint;

/// Quotes `value` for interpolation into a POSIX shell script.
#[must_use]
pub fn quote(value: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` if the process was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Creates an output with the given exit code and no captured text.
    #[must_use]
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    /// Returns `true` if the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short diagnostic for error messages.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            format!("exit code {}: {stderr}", self.exit_code)
        }
    }
}

/// Runs shell scripts on fleet machines.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs `script` on `target` and reports how it exited.
    ///
    /// A non-zero exit is not an error at this level; only a transport
    /// failure is.
    async fn run(&self, target: &Endpoint, script: &str) -> Result<CommandOutput>;
}

/// Settings for [`SshRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    /// `ssh` binary to invoke.
    pub program: String,
    /// Remote user.
    pub user: String,
    /// Extra options passed before the destination.
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            user: "root".to_string(),
            options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }
}

impl SshConfig {
    /// Sets the remote user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Appends an extra `ssh` option.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }
}

/// Runs scripts over `ssh` against each machine's public address.
#[derive(Debug, Clone, Default)]
pub struct SshRunner {
    config: SshConfig,
}

impl SshRunner {
    /// Creates a runner with the given settings.
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Returns the settings.
    #[must_use]
    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

impl CommandRunner for SshRunner {
    async fn run(&self, target: &Endpoint, script: &str) -> Result<CommandOutput> {
        let address = target.public_address.ok_or_else(|| {
            WgLinksError::command_failed(&target.name, "machine has no public address")
        })?;
        let destination = format!("{}@{address}", self.config.user);
        debug!(endpoint = %target.name, %destination, "running remote command");

        let output = Command::new(&self.config.program)
            .args(&self.config.options)
            .arg(&destination)
            .arg("--")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                WgLinksError::command_failed(
                    &target.name,
                    format!("failed to spawn {}: {e}", self.config.program),
                )
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A command recorded by [`FakeRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Target machine name.
    pub endpoint: String,
    /// Script that was run.
    pub script: String,
}

#[derive(Debug, Default)]
struct FakeRunnerState {
    calls: Vec<RecordedCommand>,
    rules: Vec<(Option<String>, String, i32)>,
}

/// A fake runner for testing.
///
/// Every script succeeds unless a rule registered with
/// [`FakeRunner::exit_with`] matches it.
#[derive(Debug, Clone, Default)]
pub struct FakeRunner {
    state: Arc<Mutex<FakeRunnerState>>,
}

impl FakeRunner {
    /// Creates a fake runner where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes scripts containing `pattern` exit with `exit_code`.
    ///
    /// With `endpoint` set the rule only applies to that machine. Later
    /// rules take precedence.
    pub async fn exit_with(&self, endpoint: Option<&str>, pattern: &str, exit_code: i32) {
        self.state.lock().await.rules.push((
            endpoint.map(str::to_string),
            pattern.to_string(),
            exit_code,
        ));
    }

    /// Returns all recorded commands in order.
    pub async fn calls(&self) -> Vec<RecordedCommand> {
        self.state.lock().await.calls.clone()
    }

    /// Returns the recorded commands for one machine.
    pub async fn calls_for(&self, endpoint: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .map(|c| c.script.clone())
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, target: &Endpoint, script: &str) -> Result<CommandOutput> {
        let mut state = self.state.lock().await;
        state.calls.push(RecordedCommand {
            endpoint: target.name.clone(),
            script: script.to_string(),
        });

        let exit_code = state
            .rules
            .iter()
            .rev()
            .find(|(endpoint, pattern, _)| {
                endpoint.as_deref().is_none_or(|e| e == target.name) && script.contains(pattern)
            })
            .map_or(0, |(_, _, code)| *code);

        Ok(CommandOutput::with_exit_code(exit_code))
    }
}
