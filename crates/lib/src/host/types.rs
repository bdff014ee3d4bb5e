use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::app::Application;
use crate::snapshot::MetaSnapshot;

use super::naming::HostName;

/// Whether the host answered, checked at most once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
  #[default]
  Unknown,
  Reachable,
  Unreachable,
}

impl Connectivity {
  pub fn is_known(self) -> bool {
    self != Connectivity::Unknown
  }

  pub fn is_reachable(self) -> bool {
    self == Connectivity::Reachable
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Host {
  pub hostname: String,
  /// Address handed to ssh; defaults to the host name.
  pub ssh_hostname: String,
  pub app_class: String,
  pub site: String,
  pub index: u32,
  pub tarname: String,
  /// Cached copy of the host's snapshot on the control side.
  pub local_snapshot: PathBuf,
  pub manifest_found: bool,
  pub connectivity: Connectivity,
  pub restart: bool,
  pub bootstrap: bool,
  /// No snapshot existed for this host when the run reconciled it.
  pub first_install: bool,
  /// Assigned applications keyed by manifest source.
  #[serde(skip)]
  pub apps: BTreeMap<String, Vec<Application>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub updates: Option<MetaSnapshot>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub failures: Vec<String>,
}

impl Host {
  pub fn new(hostname: &str, ssh_hostname: Option<&str>, name: HostName, local_snapshot: PathBuf) -> Self {
    Self {
      hostname: hostname.to_string(),
      ssh_hostname: ssh_hostname.unwrap_or(hostname).to_string(),
      app_class: name.app_class,
      site: name.site,
      index: name.index,
      tarname: hostname.to_string(),
      local_snapshot,
      manifest_found: false,
      connectivity: Connectivity::Unknown,
      restart: false,
      bootstrap: false,
      first_install: false,
      apps: BTreeMap::new(),
      updates: None,
      failures: Vec::new(),
    }
  }

  pub fn add_app(&mut self, source: &str, app: Application) {
    self.apps.entry(source.to_string()).or_default().push(app);
  }

  pub fn apps(&self, source: &str) -> &[Application] {
    self.apps.get(source).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn app_count(&self) -> usize {
    self.apps.values().map(Vec::len).sum()
  }

  /// Whether this host takes part in dispatch.
  pub fn has_updates(&self) -> bool {
    self.updates.as_ref().is_some_and(|u| u.change_count > 0)
  }

  pub fn tar_path(&self, tars_dir: &Path) -> PathBuf {
    tars_dir.join(format!("{}.tar.gz", self.tarname))
  }

  /// Values this host contributes to command and file templating.
  pub fn template_bindings(&self) -> Value {
    json!({
      "hostname": self.hostname,
      "ssh_hostname": self.ssh_hostname,
      "app_class": self.app_class,
      "site": self.site,
      "index": self.index,
      "restart": self.restart,
    })
  }

  /// The fields a worker may have changed, for merging back by host name.
  pub fn outcome(&self) -> HostOutcome {
    HostOutcome {
      hostname: self.hostname.clone(),
      connectivity: self.connectivity,
      manifest_found: self.manifest_found,
      failures: self.failures.clone(),
    }
  }

  pub(crate) fn apply_outcome(&mut self, outcome: HostOutcome) {
    if outcome.connectivity.is_known() {
      self.connectivity = outcome.connectivity;
    }
    self.manifest_found = outcome.manifest_found;
    for failure in outcome.failures {
      if !self.failures.contains(&failure) {
        self.failures.push(failure);
      }
    }
  }
}

/// Explicit result of dispatching one host; merged back into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOutcome {
  pub hostname: String,
  pub connectivity: Connectivity,
  pub manifest_found: bool,
  #[serde(default)]
  pub failures: Vec<String>,
}

impl HostOutcome {
  pub fn is_success(&self) -> bool {
    self.connectivity != Connectivity::Unreachable && self.failures.is_empty()
  }
}
