use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{AppStatus, Application, StatusSet, Track};
use crate::method::{Phase, PhaseCommands};

/// Current on-disk schema of [`MetaSnapshot`].
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("failed to create snapshot directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read snapshot: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write snapshot: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse snapshot: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize snapshot: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported snapshot schema version {0} (expected {SNAPSHOT_SCHEMA_VERSION})")]
  UnsupportedVersion(u32),
}

/// What a snapshot describes: the full installed set, or the work for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "lowercase")]
pub enum SnapshotKind {
  List {
    content_count: usize,
  },
  Update {
    #[serde(default)]
    pre_install: Vec<String>,
    #[serde(default)]
    install: Vec<String>,
    #[serde(default)]
    post_install: Vec<String>,
    restart: bool,
  },
}

/// Versioned record of a host's applications.
///
/// The `list` form is the source of truth on the host and the baseline of the next run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaSnapshot {
  pub schema_version: u32,
  pub content: Vec<Application>,
  pub track: Track,
  pub source_hostname: String,
  pub created_at: DateTime<Utc>,
  pub change_count: usize,
  #[serde(flatten)]
  pub kind: SnapshotKind,
}

impl MetaSnapshot {
  /// Everything installed once the run completes. First-run records are left out.
  pub fn list(apps: &[Application], hostname: &str, track: &Track) -> Self {
    let content = select(apps, StatusSet::CURRENT);
    Self {
      schema_version: SNAPSHOT_SCHEMA_VERSION,
      change_count: count_changes(&content),
      kind: SnapshotKind::List {
        content_count: content.len(),
      },
      content,
      track: track.clone(),
      source_hostname: hostname.to_string(),
      created_at: Utc::now(),
    }
  }

  /// The changes a host must act on, with the command names its methods require.
  pub fn update(apps: &[Application], hostname: &str, track: &Track) -> Self {
    let content = select(apps, StatusSet::TO_UPDATE);

    let mut commands = PhaseCommands::default();
    let mut restart = false;
    for app in content.iter().filter(|a| a.status() != AppStatus::Unchanged) {
      for phase in Phase::ALL {
        for name in app.method.commands.get(phase) {
          commands.push_unique(phase, name);
        }
      }
      restart |= app.method.restart;
    }

    Self {
      schema_version: SNAPSHOT_SCHEMA_VERSION,
      change_count: count_changes(&content),
      kind: SnapshotKind::Update {
        pre_install: commands.pre_install,
        install: commands.install,
        post_install: commands.post_install,
        restart,
      },
      content,
      track: track.clone(),
      source_hostname: hostname.to_string(),
      created_at: Utc::now(),
    }
  }

  pub fn is_update(&self) -> bool {
    matches!(self.kind, SnapshotKind::Update { .. })
  }

  /// Command names collected for `phase`; empty for list snapshots.
  pub fn commands(&self, phase: Phase) -> &[String] {
    match (&self.kind, phase) {
      (SnapshotKind::Update { pre_install, .. }, Phase::PreInstall) => pre_install,
      (SnapshotKind::Update { install, .. }, Phase::Install) => install,
      (SnapshotKind::Update { post_install, .. }, Phase::PostInstall) => post_install,
      (SnapshotKind::List { .. }, _) => &[],
    }
  }

  pub fn restart(&self) -> bool {
    matches!(self.kind, SnapshotKind::Update { restart: true, .. })
  }

  /// Records whose status is in `set`.
  pub fn select(&self, set: StatusSet) -> impl Iterator<Item = &Application> {
    self.content.iter().filter(move |a| set.contains(a.status()))
  }
}

fn select(apps: &[Application], set: StatusSet) -> Vec<Application> {
  apps
    .iter()
    .filter(|a| set.contains(a.status()) && !a.firstrun)
    .cloned()
    .collect()
}

fn count_changes(apps: &[Application]) -> usize {
  apps.iter().filter(|a| a.status().is_updated()).count()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::method::{DeploymentMethod, UpdateMode};

  fn app(name: &str, status: AppStatus, install: &[&str], restart: bool) -> Application {
    let mut method = DeploymentMethod::new(&format!("m_{name}"), "etc/apps", UpdateMode::Copy);
    method.commands.install = install.iter().map(|s| s.to_string()).collect();
    method.restart = restart;
    let mut app = Application::new(name, name, method, Some("c1".into()), "sh01", &Track::new());
    app.set_status(status);
    app
  }

  #[test]
  fn list_keeps_current_and_drops_firstrun() {
    let mut seeded = app("seed", AppStatus::Added, &[], false);
    seeded.firstrun = true;
    let apps = vec![
      app("a", AppStatus::Unchanged, &[], false),
      app("b", AppStatus::Added, &[], false),
      app("c", AppStatus::Deleted, &[], false),
      seeded,
    ];

    let list = MetaSnapshot::list(&apps, "sh01", &Track::new());
    let names: Vec<_> = list.content.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(list.change_count, 1);
    assert_eq!(list.kind, SnapshotKind::List { content_count: 2 });
  }

  #[test]
  fn update_collects_commands_in_order_without_duplicates() {
    let apps = vec![
      app("a", AppStatus::Unchanged, &["never"], true),
      app("b", AppStatus::Changed, &["reload", "index"], false),
      app("c", AppStatus::Added, &["index", "bump"], false),
      app("d", AppStatus::Deleted, &[], true),
    ];

    let update = MetaSnapshot::update(&apps, "sh01", &Track::new());
    assert_eq!(update.change_count, 3);
    assert_eq!(update.commands(Phase::Install), ["reload", "index", "bump"]);
    assert!(update.restart());
    assert!(update.select(StatusSet::CHANGED_ONLY).all(|a| a.name != "d"));
  }

  #[test]
  fn kind_is_flattened_with_content_type_tag() {
    let apps = vec![app("b", AppStatus::Added, &["reload"], false)];
    let update = serde_json::to_value(MetaSnapshot::update(&apps, "sh01", &Track::new())).unwrap();
    assert_eq!(update["content_type"], "update");
    assert_eq!(update["install"][0], "reload");
    assert_eq!(update["restart"], false);

    let list = serde_json::to_value(MetaSnapshot::list(&apps, "sh01", &Track::new())).unwrap();
    assert_eq!(list["content_type"], "list");
    assert_eq!(list["content_count"], 1);
    assert_eq!(list["content"][0]["status"], "added");
  }
}
