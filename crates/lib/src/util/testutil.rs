//! Test utilities for fleetroll-lib.
//!
//! A [`RecordingShell`] stands in for ssh: it records every call and answers
//! from canned responses, so workers can be tested without a network.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::HiddenValue;
use crate::host::{Host, HostName};
use crate::remote::{CommandOutput, RemoteError, RemoteShell};

/// One call made against a [`RecordingShell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  Check(String),
  Exec(String, String),
  Interactive(String, String, Vec<String>),
  Upload(String, String),
}

#[derive(Default)]
pub struct RecordingShell {
  calls: Mutex<Vec<Call>>,
  responses: Mutex<Vec<(String, CommandOutput)>>,
  unreachable: Mutex<Vec<String>>,
}

impl RecordingShell {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer commands containing `pattern` with `output`. Later registrations win.
  pub fn respond(&self, pattern: &str, output: CommandOutput) {
    self.responses.lock().unwrap().push((pattern.to_string(), output));
  }

  pub fn unreachable(&self, hostname: &str) {
    self.unreachable.lock().unwrap().push(hostname.to_string());
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  /// Command lines run on `hostname`, discrete and interactive, in order.
  pub fn commands_for(&self, hostname: &str) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .filter_map(|call| match call {
        Call::Exec(h, cmd) | Call::Interactive(h, cmd, _) if h == hostname => Some(cmd),
        _ => None,
      })
      .collect()
  }

  fn record(&self, call: Call) {
    self.calls.lock().unwrap().push(call);
  }

  fn answer(&self, command: &str) -> CommandOutput {
    self
      .responses
      .lock()
      .unwrap()
      .iter()
      .rev()
      .find(|(pattern, _)| command.contains(pattern.as_str()))
      .map(|(_, output)| output.clone())
      .unwrap_or_else(|| CommandOutput::success(""))
  }

  fn reachable(&self, host: &Host) -> Result<(), RemoteError> {
    if self.unreachable.lock().unwrap().contains(&host.hostname) {
      return Err(RemoteError::Authentication {
        host: host.hostname.clone(),
        message: "Permission denied (publickey)".into(),
      });
    }
    Ok(())
  }
}

#[async_trait]
impl RemoteShell for RecordingShell {
  async fn check(&self, host: &Host) -> Result<(), RemoteError> {
    self.record(Call::Check(host.hostname.clone()));
    self.reachable(host)
  }

  async fn exec(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError> {
    self.reachable(host)?;
    self.record(Call::Exec(host.hostname.clone(), command.to_string()));
    Ok(self.answer(command))
  }

  async fn exec_interactive(
    &self,
    host: &Host,
    command: &str,
    hidden: &[HiddenValue],
  ) -> Result<CommandOutput, RemoteError> {
    self.reachable(host)?;
    let names = hidden.iter().map(|h| h.name.clone()).collect();
    self.record(Call::Interactive(host.hostname.clone(), command.to_string(), names));
    Ok(self.answer(command))
  }

  async fn upload(&self, host: &Host, _local: &Path, remote_name: &str) -> Result<(), RemoteError> {
    self.reachable(host)?;
    self.record(Call::Upload(host.hostname.clone(), remote_name.to_string()));
    Ok(())
  }
}

/// A host named `spl{class}{index:03}-{site}` with its snapshot under `meta_dir`.
pub fn test_host(class: &str, index: u32, site: &str, meta_dir: &Path) -> Host {
  let hostname = format!("spl{class}{index:03}-{site}");
  let name = HostName {
    app_class: class.to_string(),
    site: site.to_string(),
    index,
  };
  let snapshot: PathBuf = meta_dir.join(&hostname).join("fleetroll").join("meta_test.json");
  Host::new(&hostname, None, name, snapshot)
}
