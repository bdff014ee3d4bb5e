//! Local snapshot cache.
//!
//! # Layout
//!
//! ```text
//! {base}/
//! └── <hostname>/fleetroll/
//!     └── <meta_name>.json    # last list snapshot known for the host
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::consts::META_DIR;
use crate::util::fs::{remove_path, write_atomic};

use super::types::{MetaSnapshot, SNAPSHOT_SCHEMA_VERSION, SnapshotError};

/// Per-host snapshot files under one base directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
  base_path: PathBuf,
  meta_name: String,
}

impl SnapshotStore {
  pub fn new(base_path: PathBuf, meta_name: &str) -> Self {
    Self {
      base_path,
      meta_name: meta_name.to_string(),
    }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  pub fn meta_name(&self) -> &str {
    &self.meta_name
  }

  pub fn path_for(&self, hostname: &str) -> PathBuf {
    self
      .base_path
      .join(hostname)
      .join(META_DIR)
      .join(format!("{}.json", self.meta_name))
  }

  pub fn exists(&self, hostname: &str) -> bool {
    self.path_for(hostname).is_file()
  }

  /// Load the cached snapshot. `Ok(None)` when the host has none yet.
  pub fn load(&self, hostname: &str) -> Result<Option<MetaSnapshot>, SnapshotError> {
    let path = self.path_for(hostname);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(SnapshotError::Read(e)),
    };
    parse(&content).map(Some)
  }

  /// Replace the cached snapshot atomically.
  pub fn save(&self, hostname: &str, snapshot: &MetaSnapshot) -> Result<PathBuf, SnapshotError> {
    let content = serde_json::to_string_pretty(snapshot).map_err(SnapshotError::Serialize)?;
    self.write(hostname, content.as_bytes())
  }

  /// Store snapshot text fetched from a host, after checking it parses.
  pub fn save_raw(&self, hostname: &str, content: &str) -> Result<MetaSnapshot, SnapshotError> {
    let snapshot = parse(content)?;
    self.write(hostname, content.as_bytes())?;
    Ok(snapshot)
  }

  /// Drop the cached snapshot so the next run re-fetches it from the host.
  pub fn invalidate(&self, hostname: &str) -> Result<(), SnapshotError> {
    let path = self.path_for(hostname);
    debug!(host = %hostname, path = %path.display(), "invalidating local snapshot");
    remove_path(&path).map_err(SnapshotError::Write)
  }

  /// Remove every cached snapshot.
  pub fn clean(&self) -> Result<(), SnapshotError> {
    remove_path(&self.base_path).map_err(SnapshotError::Write)
  }

  /// Host names with a cached snapshot, sorted.
  pub fn list_hosts(&self) -> Result<Vec<String>, SnapshotError> {
    let entries = match fs::read_dir(&self.base_path) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(SnapshotError::Read(e)),
    };

    let mut hosts = Vec::new();
    for entry in entries {
      let entry = entry.map_err(SnapshotError::Read)?;
      let name = entry.file_name().to_string_lossy().into_owned();
      if self.exists(&name) {
        hosts.push(name);
      }
    }
    hosts.sort();
    Ok(hosts)
  }

  fn write(&self, hostname: &str, content: &[u8]) -> Result<PathBuf, SnapshotError> {
    let path = self.path_for(hostname);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(SnapshotError::CreateDir)?;
    }
    write_atomic(&path, content).map_err(SnapshotError::Write)?;
    debug!(host = %hostname, path = %path.display(), "saved snapshot");
    Ok(path)
  }
}

fn parse(content: &str) -> Result<MetaSnapshot, SnapshotError> {
  let value: serde_json::Value = serde_json::from_str(content).map_err(SnapshotError::Parse)?;
  let version = value
    .get("schema_version")
    .and_then(serde_json::Value::as_u64)
    .unwrap_or_default() as u32;
  if version != SNAPSHOT_SCHEMA_VERSION {
    return Err(SnapshotError::UnsupportedVersion(version));
  }
  serde_json::from_value(value).map_err(SnapshotError::Parse)
}
