//! Remote command execution.
//!
//! Two modes share one [`RemoteShell`] seam:
//!
//! - discrete: one non-interactive round trip per command
//! - interactive: a pseudo-terminal session fed hidden values with `read -s`,
//!   framed by a sentinel line (see [`interactive`] and [`framing`])
//!
//! Connection failures are [`RemoteError`]s. A command that ran and failed is
//! not an error: it comes back as a [`CommandOutput`] with a non-zero exit code.

pub mod framing;
pub mod interactive;
pub mod session;
pub mod ssh;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::command::HiddenValue;
use crate::consts::{INACTIVITY_TIMEOUT, SESSION_TIMEOUT};
use crate::host::Host;

pub use session::{check_connection, ensure_connected};
pub use ssh::{SshConfig, SshShell};

#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("authentication to '{host}' failed: {message}")]
  Authentication { host: String, message: String },

  #[error("host key for '{host}' does not match: {message}")]
  HostKeyMismatch { host: String, message: String },

  #[error("'{host}' rejected the connection: {message}")]
  Rejected { host: String, message: String },

  #[error("connection to '{host}' timed out")]
  Timeout { host: String },

  #[error("connection to '{host}' refused")]
  Refused { host: String },

  #[error("cannot reach '{host}': {message}")]
  Unreachable { host: String, message: String },

  #[error("failed to upload '{file}' to '{host}': {message}")]
  Upload { host: String, file: String, message: String },
}

impl RemoteError {
  /// Failures that another attempt cannot fix.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RemoteError::Authentication { .. } | RemoteError::HostKeyMismatch { .. } | RemoteError::Rejected { .. }
    )
  }
}

/// What a remote command printed and how it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success(stdout: impl Into<String>) -> Self {
    Self {
      exit_code: 0,
      stdout: stdout.into(),
      stderr: String::new(),
    }
  }

  pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
    Self {
      exit_code,
      stdout: String::new(),
      stderr: stderr.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.exit_code == 0
  }
}

/// Timers guarding a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
  /// Absolute ceiling for the whole command.
  pub session: Duration,
  /// Longest silence tolerated; reset on every received byte.
  pub inactivity: Duration,
}

impl Default for SessionLimits {
  fn default() -> Self {
    Self {
      session: SESSION_TIMEOUT,
      inactivity: INACTIVITY_TIMEOUT,
    }
  }
}

/// Transport to the hosts of a run.
#[async_trait]
pub trait RemoteShell: Send + Sync {
  /// Cheap round trip proving the host accepts us.
  async fn check(&self, host: &Host) -> Result<(), RemoteError>;

  async fn exec(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError>;

  /// Run `command` in a terminal session after feeding each hidden value to `read -s`.
  async fn exec_interactive(
    &self,
    host: &Host,
    command: &str,
    hidden: &[HiddenValue],
  ) -> Result<CommandOutput, RemoteError>;

  /// Copy `local` into the remote user's home directory as `remote_name`.
  async fn upload(&self, host: &Host, local: &Path, remote_name: &str) -> Result<(), RemoteError>;
}

/// Replace every hidden value in `text`.
pub fn scrub(text: &str, hidden: &[HiddenValue]) -> String {
  hidden
    .iter()
    .map(HiddenValue::expose)
    .filter(|v| !v.is_empty())
    .fold(text.to_string(), |acc, secret| acc.replace(secret, "********"))
}

/// Quote `arg` for a POSIX shell. Words made of safe characters are left bare.
pub fn shell_quote(arg: &str) -> String {
  let safe = |c: char| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c);
  if !arg.is_empty() && arg.chars().all(safe) {
    return arg.to_string();
  }
  format!("'{}'", arg.replace('\'', "'\\''"))
}
