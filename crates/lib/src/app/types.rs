use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consts::DEFAULT_APP_VERSION;
use crate::method::DeploymentMethod;

use super::status::AppStatus;

/// Per-run audit record stamped onto every application and snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
  pub run_id: Uuid,
  pub started_at: DateTime<Utc>,
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub push_commit_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub push_abbrev_commit_id: Option<String>,
}

impl Track {
  pub fn new() -> Self {
    let started_at = Utc::now();
    Self {
      run_id: Uuid::new_v4(),
      version: format!("{}.{}", DEFAULT_APP_VERSION, started_at.format("%Y%m%d%H%M%S")),
      started_at,
      push_commit_id: None,
      push_abbrev_commit_id: None,
    }
  }
}

impl Default for Track {
  fn default() -> Self {
    Self::new()
  }
}

/// Commit metadata for the revision an application was staged from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLog {
  pub commit_id: String,
  pub abbrev_commit_id: String,
  pub author_name: String,
  pub author_email: String,
  pub subject: String,
}

/// Hash/dedup key. Field order gives the deterministic processing order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppKey {
  pub name: String,
  pub commit_id: String,
  pub method: String,
}

/// Identity without version, used to match records across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppIdentity {
  pub name: String,
  pub method: String,
}

/// One application as desired by the manifest or as last recorded on a host.
///
/// `status` and `updated` are only assigned by reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "super::record::ApplicationRecord", into = "super::record::ApplicationRecord")]
pub struct Application {
  pub name: String,
  pub clean_name: String,
  pub method: DeploymentMethod,
  pub commit_id: Option<String>,
  pub commit_log: Option<CommitLog>,
  pub(super) status: AppStatus,
  pub(super) updated: bool,
  pub firstrun: bool,
  pub created_at: DateTime<Utc>,
  pub track: Track,
  pub source_hostname: String,
  pub repo_source: Option<String>,
  /// Paths restored from the method's ignore list by the app's inclusion file.
  pub inclusions: Vec<String>,
}

impl Application {
  pub fn new(
    name: &str,
    clean_name: &str,
    method: DeploymentMethod,
    commit_id: Option<String>,
    source_hostname: &str,
    track: &Track,
  ) -> Self {
    Self {
      name: name.to_string(),
      clean_name: clean_name.to_string(),
      method,
      commit_id: commit_id.filter(|c| !c.is_empty()),
      commit_log: None,
      status: AppStatus::Unchanged,
      updated: false,
      firstrun: false,
      created_at: Utc::now(),
      track: track.clone(),
      source_hostname: source_hostname.to_string(),
      repo_source: None,
      inclusions: Vec::new(),
    }
  }

  pub fn status(&self) -> AppStatus {
    self.status
  }

  pub fn updated(&self) -> bool {
    self.updated
  }

  pub(crate) fn set_status(&mut self, status: AppStatus) {
    self.status = status;
    self.updated = status.is_updated();
  }

  pub fn commit_id_or_empty(&self) -> &str {
    self.commit_id.as_deref().unwrap_or_default()
  }

  pub fn key(&self) -> AppKey {
    AppKey {
      name: self.name.clone(),
      commit_id: self.commit_id_or_empty().to_string(),
      method: self.method.name.clone(),
    }
  }

  pub fn identity(&self) -> AppIdentity {
    AppIdentity {
      name: self.name.clone(),
      method: self.method.name.clone(),
    }
  }

  /// Where the application lives on the host under `apps_dir`.
  pub fn install_path(&self, apps_dir: &str) -> String {
    let mut path = apps_dir.trim_end_matches('/').to_string();
    for part in [self.method.path.as_str(), self.clean_name.as_str()] {
      let part = part.trim_matches('/');
      if !part.is_empty() {
        path.push('/');
        path.push_str(part);
      }
    }
    path
  }

  /// Abbreviated commit used for version stamping.
  pub fn abbrev_commit_id(&self) -> &str {
    match &self.commit_log {
      Some(log) => &log.abbrev_commit_id,
      None => {
        let full = self.commit_id_or_empty();
        full.get(..7).unwrap_or(full)
      }
    }
  }
}

/// Equality is (name, method, commit id).
impl PartialEq for Application {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name && self.method.name == other.method.name && self.commit_id == other.commit_id
  }
}

impl Eq for Application {}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::method::UpdateMode;

  fn app(commit: Option<&str>) -> Application {
    let method = DeploymentMethod::new("search", "etc/apps", UpdateMode::Copy);
    Application::new("TA-nix", "nix", method, commit.map(str::to_string), "sh01", &Track::new())
  }

  #[test]
  fn new_apps_start_unchanged_and_drop_empty_commit() {
    let a = app(Some(""));
    assert_eq!(a.status(), AppStatus::Unchanged);
    assert!(!a.updated());
    assert_eq!(a.commit_id, None);
  }

  #[test]
  fn set_status_keeps_updated_in_sync() {
    let mut a = app(Some("c1"));
    a.set_status(AppStatus::Deleted);
    assert!(a.updated());
    a.set_status(AppStatus::Unchanged);
    assert!(!a.updated());
  }

  #[test]
  fn equality_ignores_bookkeeping() {
    let mut a = app(Some("c1"));
    let b = app(Some("c1"));
    a.set_status(AppStatus::Added);
    a.source_hostname = "other".into();
    assert_eq!(a, b);
    assert_ne!(a, app(Some("c2")));
  }

  #[test]
  fn keys_order_by_name_commit_method() {
    let a = app(Some("c2")).key();
    let b = app(Some("c10")).key();
    assert!(b < a);
    assert_eq!(app(None).key().commit_id, "");
  }

  #[test]
  fn install_path_joins_method_path_and_clean_name() {
    let a = app(Some("c1"));
    assert_eq!(a.install_path("/opt/splunk/etc/apps/"), "/opt/splunk/etc/apps/etc/apps/nix");
  }

  #[test]
  fn abbrev_commit_falls_back_to_prefix() {
    assert_eq!(app(Some("0123456789abcdef")).abbrev_commit_id(), "0123456");
    assert_eq!(app(Some("abc")).abbrev_commit_id(), "abc");
  }
}
