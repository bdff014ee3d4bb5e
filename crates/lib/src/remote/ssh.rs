//! [`RemoteShell`] over the system `ssh` and `scp` binaries.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::command::HiddenValue;
use crate::consts::{CONNECT_TIMEOUT, MAX_UPLOAD_ATTEMPTS, TIMEOUT_EXIT_CODE, UPLOAD_RETRY_BACKOFF};
use crate::host::Host;

use super::interactive::{InteractiveRequest, run_interactive};
use super::{CommandOutput, RemoteError, RemoteShell, SessionLimits};

/// Exit status ssh itself uses for connection-level failures.
const SSH_ERROR_EXIT: i32 = 255;
const CHECK_COMMAND: &str = "echo checking_connection";

#[derive(Debug, Clone)]
pub struct SshConfig {
  pub user: String,
  pub key_file: Option<PathBuf>,
  pub port: u16,
  pub connect_timeout: Duration,
  pub limits: SessionLimits,
  /// Log every operation and report success without touching the network.
  pub dry_run: bool,
  pub ssh_program: String,
  pub scp_program: String,
}

impl Default for SshConfig {
  fn default() -> Self {
    Self {
      user: String::new(),
      key_file: None,
      port: 22,
      connect_timeout: CONNECT_TIMEOUT,
      limits: SessionLimits::default(),
      dry_run: false,
      ssh_program: "ssh".into(),
      scp_program: "scp".into(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct SshShell {
  config: SshConfig,
}

impl SshShell {
  pub fn new(config: SshConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &SshConfig {
    &self.config
  }

  fn common_options(&self) -> Vec<String> {
    let mut args = vec![
      "-o".to_string(),
      "BatchMode=yes".to_string(),
      "-o".to_string(),
      "StrictHostKeyChecking=accept-new".to_string(),
      "-o".to_string(),
      format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)),
    ];
    if let Some(key) = &self.config.key_file {
      args.push("-i".to_string());
      args.push(key.to_string_lossy().into_owned());
    }
    args
  }

  fn destination(&self, host: &Host) -> String {
    if self.config.user.is_empty() {
      host.ssh_hostname.clone()
    } else {
      format!("{}@{}", self.config.user, host.ssh_hostname)
    }
  }

  fn ssh_command(&self, host: &Host, tty: bool) -> Command {
    let mut cmd = Command::new(&self.config.ssh_program);
    cmd.args(self.common_options());
    cmd.arg("-p").arg(self.config.port.to_string());
    if tty {
      cmd.arg("-tt");
    }
    cmd.arg(self.destination(host));
    cmd.kill_on_drop(true);
    cmd
  }

  async fn run_discrete(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError> {
    let mut cmd = self.ssh_command(host, false);
    cmd.arg("--").arg(command);
    cmd.stdin(Stdio::null());

    let child = cmd.output();
    let output = match timeout(self.config.limits.session, child).await {
      Ok(result) => result.map_err(|source| RemoteError::Spawn {
        program: self.config.ssh_program.clone(),
        source,
      })?,
      Err(_) => {
        return Ok(CommandOutput::failure(
          TIMEOUT_EXIT_CODE,
          format!("command timed out after {}s", self.config.limits.session.as_secs()),
        ));
      }
    };

    let result = CommandOutput {
      exit_code: output.status.code().unwrap_or(SSH_ERROR_EXIT),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    // a remote command may exit 255 too; only ssh's own diagnostics mean the session failed
    if result.exit_code == SSH_ERROR_EXIT && is_ssh_failure(&result.stderr) {
      return Err(classify(&host.hostname, &result.stderr));
    }
    Ok(result)
  }
}

const SSH_FAILURE_SIGNATURES: &[&str] = &[
  "host key verification failed",
  "remote host identification has changed",
  "permission denied (",
  "too many authentication failures",
  "kex_exchange_identification",
  "connection closed by",
  "connection reset by",
  "connection timed out",
  "connection refused",
  "no route to host",
  "could not resolve hostname",
  "unable to negotiate",
];

/// Whether `stderr` carries a diagnostic of the ssh client rather than of the remote command.
pub fn is_ssh_failure(stderr: &str) -> bool {
  stderr.lines().any(|line| {
    let line = line.trim().to_lowercase();
    line.starts_with("ssh:") || SSH_FAILURE_SIGNATURES.iter().any(|sig| line.contains(sig))
  })
}

/// Map ssh's diagnostics onto the failure classes.
pub fn classify(host: &str, stderr: &str) -> RemoteError {
  let host = host.to_string();
  let message = stderr.trim().lines().last().unwrap_or_default().to_string();
  let lower = stderr.to_lowercase();

  if lower.contains("host key verification failed") || lower.contains("remote host identification has changed") {
    RemoteError::HostKeyMismatch { host, message }
  } else if lower.contains("permission denied") || lower.contains("too many authentication failures") {
    RemoteError::Authentication { host, message }
  } else if lower.contains("no matching") || lower.contains("protocol") || lower.contains("kex_exchange_identification")
  {
    RemoteError::Rejected { host, message }
  } else if lower.contains("timed out") {
    RemoteError::Timeout { host }
  } else if lower.contains("connection refused") {
    RemoteError::Refused { host }
  } else {
    RemoteError::Unreachable { host, message }
  }
}

#[async_trait]
impl RemoteShell for SshShell {
  async fn check(&self, host: &Host) -> Result<(), RemoteError> {
    if self.config.dry_run {
      info!(host = %host.hostname, "dry run: connection check skipped");
      return Ok(());
    }
    let output = self.run_discrete(host, CHECK_COMMAND).await?;
    if output.is_success() {
      Ok(())
    } else {
      Err(classify(&host.hostname, &output.stderr))
    }
  }

  async fn exec(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError> {
    if self.config.dry_run {
      info!(host = %host.hostname, %command, "dry run: command not executed");
      return Ok(CommandOutput::success(""));
    }
    debug!(host = %host.hostname, %command, "ssh exec");
    self.run_discrete(host, command).await
  }

  async fn exec_interactive(
    &self,
    host: &Host,
    command: &str,
    hidden: &[HiddenValue],
  ) -> Result<CommandOutput, RemoteError> {
    if self.config.dry_run {
      info!(host = %host.hostname, %command, "dry run: interactive command not executed");
      return Ok(CommandOutput::success(""));
    }

    let mut cmd = self.ssh_command(host, true);
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|source| RemoteError::Spawn {
      program: self.config.ssh_program.clone(),
      source,
    })?;

    let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
      return Err(RemoteError::Unreachable {
        host: host.hostname.clone(),
        message: "session has no stdio".into(),
      });
    };

    let request = InteractiveRequest { command, hidden };
    let mut output = run_interactive(&mut stdout, &mut stdin, &request, self.config.limits).await;

    drop(stdin);
    if let Err(e) = child.start_kill() {
      debug!(host = %host.hostname, error = %e, "session already gone");
    }
    if output.exit_code == SSH_ERROR_EXIT && output.stdout.is_empty() {
      let mut stderr = String::new();
      if let Some(mut pipe) = child.stderr.take() {
        use tokio::io::AsyncReadExt;
        let _ = timeout(Duration::from_secs(1), pipe.read_to_string(&mut stderr)).await;
      }
      // a silent session end counts as a lost connection
      if stderr.trim().is_empty() || is_ssh_failure(&stderr) {
        return Err(classify(&host.hostname, &stderr));
      }
      output.stderr = stderr;
    }
    let _ = child.wait().await;
    output.stdout = output.stdout.trim_end().to_string();
    Ok(output)
  }

  async fn upload(&self, host: &Host, local: &Path, remote_name: &str) -> Result<(), RemoteError> {
    if self.config.dry_run {
      info!(host = %host.hostname, file = %local.display(), "dry run: upload skipped");
      return Ok(());
    }

    let mut last_error = String::new();
    for attempt in 1..=MAX_UPLOAD_ATTEMPTS {
      let mut cmd = Command::new(&self.config.scp_program);
      cmd
        .args(self.common_options())
        .arg("-P")
        .arg(self.config.port.to_string())
        .arg(local)
        .arg(format!("{}:{}", self.destination(host), remote_name))
        .stdin(Stdio::null())
        .kill_on_drop(true);

      let output = cmd.output().await.map_err(|source| RemoteError::Spawn {
        program: self.config.scp_program.clone(),
        source,
      })?;
      if output.status.success() {
        debug!(host = %host.hostname, file = %local.display(), attempt, "uploaded");
        return Ok(());
      }

      last_error = String::from_utf8_lossy(&output.stderr).trim().to_string();
      let err = classify(&host.hostname, &last_error);
      if err.is_terminal() {
        return Err(err);
      }
      warn!(host = %host.hostname, attempt, error = %last_error, "upload failed");
      if attempt < MAX_UPLOAD_ATTEMPTS {
        sleep(UPLOAD_RETRY_BACKOFF).await;
      }
    }

    Err(RemoteError::Upload {
      host: host.hostname.clone(),
      file: local.display().to_string(),
      message: last_error,
    })
  }
}
