//! Shared state handed to every host worker of a run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Value, json};

use crate::command::CommandSet;
use crate::consts::{META_DIR, META_LOGS_DIR};
use crate::host::HostRegistry;
use crate::snapshot::SnapshotStore;
use crate::template;

/// Where things live on a host, derived from the remote applications folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
  apps_dir: String,
  app_binary: String,
  meta_name: String,
  use_sudo: bool,
}

impl RemoteLayout {
  pub fn new(apps_dir: &str, app_binary: &str, meta_name: &str) -> Self {
    let trimmed = apps_dir.trim_end_matches('/');
    Self {
      apps_dir: if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() },
      app_binary: app_binary.to_string(),
      meta_name: meta_name.to_string(),
      use_sudo: true,
    }
  }

  /// Run built-in file operations without `sudo`.
  pub fn without_sudo(mut self) -> Self {
    self.use_sudo = false;
    self
  }

  pub fn apps_dir(&self) -> &str {
    &self.apps_dir
  }

  /// Directory the bundle is unpacked into.
  pub fn base_location(&self) -> &str {
    match self.apps_dir.rfind('/') {
      Some(0) | None => "/",
      Some(i) => &self.apps_dir[..i],
    }
  }

  /// Top-level directory name inside every bundle.
  pub fn bundle_root(&self) -> &str {
    match self.apps_dir.rfind('/') {
      Some(i) => &self.apps_dir[i + 1..],
      None => &self.apps_dir,
    }
  }

  pub fn meta_dir(&self) -> String {
    format!("{}/{META_DIR}", self.apps_dir)
  }

  pub fn logs_dir(&self) -> String {
    format!("{}/{META_DIR}/{META_LOGS_DIR}", self.apps_dir)
  }

  /// The list snapshot as installed on the host.
  pub fn meta_file(&self) -> String {
    format!("{}/{META_DIR}/{}.json", self.apps_dir, self.meta_name)
  }

  /// Absolute path of the application binary; empty when none is configured.
  pub fn app_binary(&self) -> String {
    match self.app_binary.as_str() {
      "" => String::new(),
      bin if bin.starts_with('/') => bin.to_string(),
      bin => format!("{}/{bin}", self.apps_dir),
    }
  }

  /// Whether `path` is strictly below the applications folder.
  pub fn contains(&self, path: &str) -> bool {
    let prefix = if self.apps_dir == "/" { "/".to_string() } else { format!("{}/", self.apps_dir) };
    path.len() > prefix.len() && path.starts_with(&prefix) && !path.split('/').any(|part| part == "..")
  }

  /// Prefix `command` with `sudo` when built-in operations run as root.
  pub fn privileged(&self, command: &str) -> String {
    if self.use_sudo { format!("sudo {command}") } else { command.to_string() }
  }
}

/// Everything a worker needs besides the host itself.
pub struct RunContext<S> {
  pub shell: S,
  pub commands: CommandSet,
  pub snapshots: SnapshotStore,
  pub layout: RemoteLayout,
  /// User template values merged with the `host_groups` tree.
  pub template_values: Value,
  pub tars_dir: PathBuf,
  pub dry_run: bool,
}

impl<S> RunContext<S> {
  /// Template values for one host: run-wide values overlaid by the host's own.
  pub fn bindings_for(&self, host_bindings: &Value) -> Value {
    template::merge(&[&self.template_values, host_bindings])
  }
}

/// The `host_groups` tree exposed to templates: hosts per class, every host, and ssh names.
pub fn host_groups(registry: &HostRegistry) -> Value {
  let mut by_class: BTreeMap<String, Vec<String>> = BTreeMap::new();
  let mut all = Vec::new();
  let mut refs = BTreeMap::new();
  for host in registry.iter() {
    by_class
      .entry(host.app_class.clone())
      .or_default()
      .push(host.hostname.clone());
    all.push(host.hostname.clone());
    refs.insert(host.hostname.clone(), host.ssh_hostname.clone());
  }
  for hosts in by_class.values_mut() {
    hosts.sort();
  }
  all.sort();

  json!({
    "host_groups": {
      "app_class": by_class,
      "all": all,
      "ref": refs,
    }
  })
}

/// Run-wide template values with the `host_groups` tree added.
pub fn run_template_values(user_values: &Value, registry: &HostRegistry) -> Value {
  template::merge(&[user_values, &host_groups(registry)])
}
