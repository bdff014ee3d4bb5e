//! Reconciliation: desired applications against a host's last snapshot.
//!
//! The pass is deterministic and idempotent. Feeding the list snapshot it
//! produces back in with the same desired set yields only `unchanged`
//! records.
//!
//! ```text
//! desired ──dedup──sort──validate──resolve commit──classify──┐
//!                                                            ├── Reconciliation
//! previous snapshot ──pool──────────── leftovers ─moved?─────┘
//! ```

mod artifacts;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::app::{AppIdentity, AppKey, AppStatus, Application, StatusSet, Track};
use crate::snapshot::MetaSnapshot;

pub use artifacts::{ArtifactSource, DirectoryArtifacts};

/// Per-application problems. Collected, never fatal for the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
  #[error("application '{app}' for host '{hostname}' is missing from the repository")]
  ArtifactMissing { hostname: String, app: String },

  #[error("application '{app}' for host '{hostname}' has no commit id")]
  MissingCommitId { hostname: String, app: String },
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
  /// Reject desired applications without a commit id instead of substituting the head.
  pub strict_commit_ids: bool,
  pub head_commit_id: Option<String>,
}

/// A desired key that appeared more than once; only the first occurrence was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
  pub key: AppKey,
  pub count: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
  pub hostname: String,
  /// Classified records: desired ones in key order, then deletions.
  pub apps: Vec<Application>,
  pub duplicates: Vec<Duplicate>,
  pub errors: Vec<ReconcileError>,
  /// Previous records absorbed by an `added` record at a new install path.
  pub moved: Vec<AppIdentity>,
}

impl Reconciliation {
  /// Nothing to do on the host.
  pub fn is_unchanged(&self) -> bool {
    self.apps.iter().all(|a| a.status() == AppStatus::Unchanged)
  }

  pub fn change_count(&self) -> usize {
    self.apps.iter().filter(|a| a.updated()).count()
  }

  pub fn select(&self, set: StatusSet) -> impl Iterator<Item = &Application> {
    self.apps.iter().filter(move |a| set.contains(a.status()))
  }

  pub fn list_snapshot(&self, track: &Track) -> MetaSnapshot {
    MetaSnapshot::list(&self.apps, &self.hostname, track)
  }

  pub fn update_snapshot(&self, track: &Track) -> MetaSnapshot {
    MetaSnapshot::update(&self.apps, &self.hostname, track)
  }
}

/// Fill in a missing commit id. Runs before any classification.
pub fn resolve_commit_id(
  app: &mut Application,
  hostname: &str,
  options: &ReconcileOptions,
) -> Result<(), ReconcileError> {
  if app.commit_id.is_some() {
    return Ok(());
  }
  match (&options.head_commit_id, options.strict_commit_ids) {
    (Some(head), false) => {
      debug!(host = %hostname, app = %app.name, commit = %head, "using repository head for application without commit id");
      app.commit_id = Some(head.clone());
      Ok(())
    }
    _ => Err(ReconcileError::MissingCommitId {
      hostname: hostname.to_string(),
      app: app.name.clone(),
    }),
  }
}

/// Classify `desired` against `previous` for one host.
pub fn reconcile(
  hostname: &str,
  desired: &[Application],
  previous: Option<&MetaSnapshot>,
  artifacts: &impl ArtifactSource,
  options: &ReconcileOptions,
) -> Reconciliation {
  let mut result = Reconciliation {
    hostname: hostname.to_string(),
    apps: Vec::new(),
    duplicates: Vec::new(),
    errors: Vec::new(),
    moved: Vec::new(),
  };

  // first occurrence wins; the map also gives key order
  let mut unique: BTreeMap<AppKey, (&Application, usize)> = BTreeMap::new();
  for app in desired {
    unique.entry(app.key()).or_insert((app, 0)).1 += 1;
  }
  for (key, (_, count)) in &unique {
    if *count > 1 {
      warn!(host = %hostname, app = %key.name, commit = %key.commit_id, method = %key.method, count, "duplicate application in manifest");
      result.duplicates.push(Duplicate {
        key: key.clone(),
        count: *count,
      });
    }
  }

  let mut pool: Vec<Application> = previous
    .map(|s| s.select(StatusSet::CURRENT).cloned().collect())
    .unwrap_or_default();

  for (desired_app, _) in unique.into_values() {
    let identity = desired_app.identity();
    if result.apps.iter().any(|a| a.identity() == identity) {
      warn!(host = %hostname, app = %identity.name, method = %identity.method, "application listed with more than one commit; keeping the lowest");
      continue;
    }

    let mut app = desired_app.clone();
    let validated = if artifacts.exists(&app.name) {
      resolve_commit_id(&mut app, hostname, options)
    } else {
      Err(ReconcileError::ArtifactMissing {
        hostname: hostname.to_string(),
        app: app.name.clone(),
      })
    };

    let remote = take_match(&mut pool, &identity);

    if let Err(err) = validated {
      warn!(host = %hostname, app = %app.name, error = %err, "skipping application");
      result.errors.push(err);
      // keep what the host already runs rather than deleting it
      if let Some(mut kept) = remote {
        kept.set_status(AppStatus::Unchanged);
        result.apps.push(kept);
      }
      continue;
    }

    match remote {
      Some(remote) if remote.commit_id != app.commit_id => {
        app.set_status(AppStatus::Changed);
      }
      Some(remote) => {
        app.set_status(AppStatus::Unchanged);
        app.inclusions = remote.inclusions;
        if app.commit_log.is_none() {
          app.commit_log = remote.commit_log;
          app.repo_source = remote.repo_source;
        }
      }
      None => app.set_status(AppStatus::Added),
    }
    result.apps.push(app);
  }

  for mut leftover in pool {
    let moved_to = result.apps.iter().position(|a| {
      a.status() == AppStatus::Added && a.name == leftover.name && a.install_path("") != leftover.install_path("")
    });
    match moved_to {
      Some(index) => {
        let added = &mut result.apps[index];
        debug!(host = %hostname, app = %leftover.name, from = %leftover.method.name, to = %added.method.name, "application moved");
        added.set_status(AppStatus::Changed);
        result.moved.push(leftover.identity());
      }
      None => {
        leftover.set_status(AppStatus::Deleted);
        result.apps.push(leftover);
      }
    }
  }

  result
}

fn take_match(pool: &mut Vec<Application>, identity: &AppIdentity) -> Option<Application> {
  let index = pool.iter().position(|a| a.identity() == *identity)?;
  Some(pool.remove(index))
}

#[cfg(test)]
mod tests;
