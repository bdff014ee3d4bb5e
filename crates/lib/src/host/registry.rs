use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use super::naming::{DEFAULT_SITE, HostName, HostNameFormat, NamingError};
use super::types::{Host, HostOutcome};

#[derive(Debug, Error)]
pub enum HostError {
  #[error("host '{0}' is defined more than once")]
  Duplicate(String),

  #[error(transparent)]
  Naming(#[from] NamingError),
}

/// All hosts of a run, unique by host name, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
  hosts: Vec<Host>,
}

impl HostRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, host: Host) -> Result<(), HostError> {
    if self.get(&host.hostname).is_some() {
      return Err(HostError::Duplicate(host.hostname));
    }
    self.hosts.push(host);
    Ok(())
  }

  pub fn get(&self, hostname: &str) -> Option<&Host> {
    self.hosts.iter().find(|h| h.hostname == hostname)
  }

  pub fn get_mut(&mut self, hostname: &str) -> Option<&mut Host> {
    self.hosts.iter_mut().find(|h| h.hostname == hostname)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Host> {
    self.hosts.iter()
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Host> {
    self.hosts.iter_mut()
  }

  pub fn len(&self) -> usize {
    self.hosts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.hosts.is_empty()
  }

  /// Owned copies of the named hosts, in registry order.
  pub fn snapshot_of(&self, hostnames: &[String]) -> Vec<Host> {
    self
      .hosts
      .iter()
      .filter(|h| hostnames.contains(&h.hostname))
      .cloned()
      .collect()
  }

  /// Merge a worker's outcome into the matching host. Returns `false` when no host matches.
  pub fn merge(&mut self, outcome: HostOutcome) -> bool {
    match self.get_mut(&outcome.hostname) {
      Some(host) => {
        host.apply_outcome(outcome);
        true
      }
      None => false,
    }
  }

  /// Distinct sites, sorted.
  pub fn sites(&self) -> Vec<String> {
    let mut sites: Vec<String> = self.hosts.iter().map(|h| h.site.clone()).collect();
    sites.sort();
    sites.dedup();
    sites
  }

  /// Distinct host classes in first-seen order.
  pub fn classes(&self) -> Vec<String> {
    let mut classes: Vec<String> = Vec::new();
    for host in &self.hosts {
      if !classes.contains(&host.app_class) {
        classes.push(host.app_class.clone());
      }
    }
    classes
  }
}

/// Split a `name[.domain][:address]` host argument into the short host name and the ssh address.
pub fn parse_host_spec(spec: &str) -> (String, String) {
  let spec = spec.trim().trim_matches(['\'', '"']);
  let mut parts = spec.split(':');
  let first = parts.next().unwrap_or_default();
  let hostname = first.split('.').next().unwrap_or_default().to_string();
  let ssh_hostname = spec.rsplit(':').next().unwrap_or(first).to_string();
  (hostname, ssh_hostname)
}

/// Build the host registry from explicit host arguments, or one generated host per class.
///
/// Hosts whose names do not fit `format` for any of `classes` are skipped with a warning.
pub fn build_registry(
  specs: &[String],
  classes: &[String],
  format: &HostNameFormat,
  snapshot_path: impl Fn(&str) -> PathBuf,
) -> Result<HostRegistry, HostError> {
  let mut registry = HostRegistry::new();

  if specs.is_empty() {
    for class in classes {
      let hostname = format.build(class, DEFAULT_SITE, 1);
      let name = HostName {
        app_class: class.clone(),
        site: DEFAULT_SITE.to_string(),
        index: 1,
      };
      debug!(host = %hostname, class = %class, "generated host");
      registry.insert(Host::new(&hostname, None, name, snapshot_path(&hostname)))?;
    }
    return Ok(registry);
  }

  for spec in specs.iter().flat_map(|s| s.split_whitespace()) {
    let (hostname, ssh_hostname) = parse_host_spec(spec);
    match format.parse(&hostname, classes) {
      Some(name) => {
        registry.insert(Host::new(&hostname, Some(&ssh_hostname), name, snapshot_path(&hostname)))?;
      }
      None => warn!(host = %hostname, format = %format, "host does not match the naming format for any known class"),
    }
  }

  Ok(registry)
}
