//! The run flow.
//!
//! [`run`] owns the outer steps: lock, repository sync, configuration,
//! host registry. It then hands a [`Rollout`] the loaded pieces; the
//! rollout reconciles, stages and dispatches. The split lets tests drive a
//! rollout against a plain directory and a fake shell.

mod events;
mod paths;
mod rollout;
mod run;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::app::{CommitLog, Track};
use crate::command::CommandConfigError;
use crate::host::{Connectivity, HostError, NamingError};
use crate::manifest::ManifestError;
use crate::method::MethodError;
use crate::package::PackageError;
use crate::remote::SshConfig;
use crate::repo::{RepoError, RepoManager};
use crate::run_lock::{LockMetadata, RunLockError};
use crate::snapshot::SnapshotError;
use crate::template::TemplateError;

pub use events::{EVENT_TARGET, log_app_events};
pub use paths::RunPaths;
pub use rollout::Rollout;
pub use run::run;

#[derive(Debug, Error)]
pub enum RunError {
  #[error(transparent)]
  Lock(#[from] RunLockError),

  #[error("repository error: {0}")]
  Repo(#[from] RepoError),

  #[error("deployment methods: {0}")]
  Methods(#[from] MethodError),

  #[error("commands: {0}")]
  Commands(#[from] CommandConfigError),

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Hosts(#[from] HostError),

  #[error("invalid host name format: {0}")]
  Naming(#[from] NamingError),

  #[error("template values: {0}")]
  Template(#[from] TemplateError),

  #[error("no hosts left after filtering")]
  NoHosts,

  #[error("--{0} is required")]
  MissingOption(&'static str),

  #[error("failed to clean '{path}': {source}")]
  Clean {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("snapshot error: {0}")]
  Snapshot(#[from] SnapshotError),

  #[error("failed to prepare staging directory: {0}")]
  Staging(#[source] PackageError),
}

/// What a run does once hosts are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
  /// Stage, bundle and roll out.
  #[default]
  Deploy,
  /// Reconcile against cached snapshots only; nothing is staged or sent.
  Plan,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
  pub mode: RunMode,
  /// Names the scratch subdirectory and the snapshot files.
  pub refname: String,
  pub scratch_dir: PathBuf,
  pub repo_url: String,
  pub repo_branch: String,
  /// Application sources, relative to the checkout.
  pub apps_folder: String,
  pub manifest_name: String,
  /// Commands configuration; defaults to the one in the checkout.
  pub commands_file: Option<PathBuf>,
  pub hosts: Vec<String>,
  pub host_classes: Vec<String>,
  pub name_format: String,
  pub boot_order: Vec<String>,
  pub site_override: bool,
  pub num_connections: usize,
  pub strict_commit_ids: bool,
  pub firstrun: bool,
  pub dry_run: bool,
  pub clean: bool,
  pub clean_repo: bool,
  pub clean_metas: bool,
  pub skip_repo_sync: bool,
  /// Template content files, not only commands.
  pub templating: bool,
  pub template_values: Value,
  pub install_ignore: Vec<String>,
  /// Applications directory on the hosts.
  pub remote_apps_dir: String,
  pub app_binary: String,
  pub ssh: SshConfig,
  /// Directory of the run and event log files; `None` disables them.
  pub logging_path: Option<PathBuf>,
}

impl RunOptions {
  pub fn meta_name(&self) -> String {
    format!("{}{}", crate::consts::META_FILE_PREFIX, self.refname)
  }
}

/// Where staged content comes from, pinned per application commit.
pub trait SourceTree {
  /// Checkout root.
  fn root(&self) -> &Path;

  /// Move to `rev`, or back to the tracked branch when `None`.
  fn checkout(&mut self, rev: Option<&str>) -> Result<(), RepoError>;

  /// Commit metadata of the current checkout.
  fn commit_log(&self) -> Result<CommitLog, RepoError>;
}

impl SourceTree for RepoManager {
  fn root(&self) -> &Path {
    self.path()
  }

  fn checkout(&mut self, rev: Option<&str>) -> Result<(), RepoError> {
    RepoManager::checkout(self, rev)
  }

  fn commit_log(&self) -> Result<CommitLog, RepoError> {
    RepoManager::commit_log(self, None)
  }
}

/// Per-host result of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostSummary {
  pub hostname: String,
  pub added: Vec<String>,
  pub changed: Vec<String>,
  pub deleted: Vec<String>,
  pub connectivity: Connectivity,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub failures: Vec<String>,
}

impl HostSummary {
  pub fn change_count(&self) -> usize {
    self.added.len() + self.changed.len() + self.deleted.len()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub track: Track,
  pub changed: bool,
  pub mode: RunMode,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub hosts: Vec<HostSummary>,
  /// Per-application problems found while reconciling.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<String>,
  /// Set when another run held the lock and nothing was done.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub locked_by: Option<LockMetadata>,
}

impl RunReport {
  pub fn unchanged(track: Track, mode: RunMode) -> Self {
    Self {
      track,
      changed: false,
      mode,
      hosts: Vec::new(),
      errors: Vec::new(),
      locked_by: None,
    }
  }

  /// No application errors. Host failures are reported but do not fail the run.
  pub fn is_success(&self) -> bool {
    self.errors.is_empty()
  }

  pub fn has_host_failures(&self) -> bool {
    self.hosts.iter().any(|h| !h.failures.is_empty())
  }
}
