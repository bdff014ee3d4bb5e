//! Per-host staging and bundling.
//!
//! Each host with changes gets a staging tree mirroring the remote
//! applications directory, which is then packed into one tarball:
//!
//! ```text
//! {tmp}/hosts/<hostname>/
//! ├── <method path>/<clean name>/...     copy
//! ├── <method path>/...                  copy_in_place
//! └── fleetroll/
//!     ├── meta_<ref>.json                list snapshot
//!     ├── meta_<ref>_update.json         update snapshot
//!     └── logs/meta_<ref>[_update]_<ts>.log
//! {tmp}/tars/<tarname>.tar.gz            root entry: basename of the apps dir
//! ```

mod bundle;
mod ignore;
mod version;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::app::Application;
use crate::consts::{IGNORE_STAGING_DIR, META_DIR, META_LOGS_DIR, VERSION_FILE_PREFIX};
use crate::host::Host;
use crate::snapshot::MetaSnapshot;
use crate::template::{self, TemplateError};
use crate::util::fs::{copy_tree, remove_path, write_atomic};

pub use bundle::write_bundle;
pub use ignore::{MoveReport, move_matching};
pub use version::{remove_launcher_version, stamp_launcher_version};

const DEFAULT_APP_CONF: &str = "default/app.conf";
const LOCAL_APP_CONF: &str = "local/app.conf";

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("I/O error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid ignore pattern '{pattern}': {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: regex::Error,
  },

  #[error("inclusion file of '{app}' lists missing paths: {}", paths.join(", "))]
  Inclusion { app: String, paths: Vec<String> },

  #[error("failed to template '{path}': {source}")]
  Template {
    path: PathBuf,
    #[source]
    source: TemplateError,
  },

  #[error("failed to serialize metadata: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("failed to write bundle '{path}': {source}")]
  Bundle {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl PackageError {
  pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
    PackageError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Staging directories under the run's scratch `tmp/`.
#[derive(Debug, Clone)]
pub struct StagingLayout {
  hosts_dir: PathBuf,
  tars_dir: PathBuf,
}

impl StagingLayout {
  pub fn new(tmp_dir: &Path) -> Self {
    Self {
      hosts_dir: tmp_dir.join("hosts"),
      tars_dir: tmp_dir.join("tars"),
    }
  }

  /// Start from an empty staging area.
  pub fn reset(&self) -> Result<(), PackageError> {
    for dir in [&self.hosts_dir, &self.tars_dir] {
      remove_path(dir).map_err(|e| PackageError::io(dir, e))?;
      fs::create_dir_all(dir).map_err(|e| PackageError::io(dir, e))?;
    }
    Ok(())
  }

  pub fn host_dir(&self, hostname: &str) -> PathBuf {
    self.hosts_dir.join(hostname)
  }

  pub fn meta_dir(&self, hostname: &str) -> PathBuf {
    self.host_dir(hostname).join(META_DIR)
  }

  pub fn tars_dir(&self) -> &Path {
    &self.tars_dir
  }
}

#[derive(Debug, Clone, Default)]
pub struct StageSettings {
  /// Directory of application sources in the checkout.
  pub apps_source: PathBuf,
  /// Root entry name of every bundle.
  pub bundle_root: String,
  pub meta_name: String,
  /// Patterns never shipped, whatever the method says.
  pub global_ignore: Vec<String>,
  pub inclusion_file: Option<String>,
  /// Values for file templating; `None` disables it.
  pub template_values: Option<Value>,
}

/// Files written by [`Stager::write_meta`].
#[derive(Debug, Clone)]
pub struct MetaFiles {
  pub list: PathBuf,
  pub update: PathBuf,
  pub list_log: PathBuf,
  pub update_log: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Stager {
  layout: StagingLayout,
  settings: StageSettings,
}

impl Stager {
  pub fn new(layout: StagingLayout, settings: StageSettings) -> Self {
    Self { layout, settings }
  }

  pub fn layout(&self) -> &StagingLayout {
    &self.layout
  }

  /// Copy one application's content into the host's staging tree.
  ///
  /// The checkout must already be at the application's commit. Returns the
  /// staged application directory.
  pub fn stage_app(&self, host: &Host, app: &mut Application) -> Result<PathBuf, PackageError> {
    let source = self.settings.apps_source.join(&app.name);
    let method_dir = self.layout.host_dir(&host.hostname).join(app.method.path.trim_matches('/'));
    let dest = if app.method.is_copy() {
      method_dir.join(&app.clean_name)
    } else {
      method_dir
    };

    debug!(host = %host.hostname, app = %app.name, dest = %dest.display(), "staging application");
    copy_tree(&source, &dest).map_err(|e| PackageError::io(&source, e))?;

    let ignore_dir = dest.join(IGNORE_STAGING_DIR);
    if !self.settings.global_ignore.is_empty() {
      let report = move_matching(&self.settings.global_ignore, &dest, &ignore_dir)?;
      if !report.moved.is_empty() {
        error!(host = %host.hostname, app = %app.name, files = ?report.moved, "globally ignored files removed from application");
      }
      remove_path(&ignore_dir).map_err(|e| PackageError::io(&ignore_dir, e))?;
    }

    // new installs ship everything
    if !app.method.install_ignore.is_empty() && app.status() != crate::app::AppStatus::Added {
      move_matching(&app.method.install_ignore, &dest, &ignore_dir)?;
      self.restore_inclusions(app, &dest, &ignore_dir)?;
    }
    remove_path(&ignore_dir).map_err(|e| PackageError::io(&ignore_dir, e))?;

    if let Some(values) = &self.settings.template_values
      && !app.method.skip_templating
    {
      let app_value = serde_json::to_value(&*app)?;
      let bindings = template::merge(&[values, &host.template_bindings(), &app_value]);
      template_directory(&dest, &bindings)?;
    }

    if app.method.is_copy() {
      set_executable(&dest)?;
      let version_file = dest.join(format!("{}_{}.json", VERSION_FILE_PREFIX, Utc::now().format("%Y%m%d%H%M%S")));
      write_atomic(&version_file, serde_json::to_string(&*app)?.as_bytes())
        .map_err(|e| PackageError::io(&version_file, e))?;
      stamp_app_conf(&dest, app.abbrev_commit_id())?;
    }

    Ok(dest)
  }

  fn restore_inclusions(&self, app: &mut Application, dest: &Path, ignore_dir: &Path) -> Result<(), PackageError> {
    let Some(file_name) = &self.settings.inclusion_file else {
      return Ok(());
    };
    let inclusion_path = dest.join(file_name);
    if !inclusion_path.is_file() {
      return Ok(());
    }

    let text = fs::read_to_string(&inclusion_path).map_err(|e| PackageError::io(&inclusion_path, e))?;
    let lines: Vec<String> = text.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect();
    let report = move_matching(&lines, ignore_dir, dest)?;
    if !report.missing.is_empty() {
      return Err(PackageError::Inclusion {
        app: app.name.clone(),
        paths: report.missing,
      });
    }

    app.inclusions = report.moved;
    fs::remove_file(&inclusion_path).map_err(|e| PackageError::io(&inclusion_path, e))?;
    Ok(())
  }

  /// Write the snapshot files and their JSONL logs into the host's staging tree.
  pub fn write_meta(&self, hostname: &str, list: &MetaSnapshot, update: &MetaSnapshot) -> Result<MetaFiles, PackageError> {
    let meta_dir = self.layout.meta_dir(hostname);
    let logs_dir = meta_dir.join(META_LOGS_DIR);
    fs::create_dir_all(&logs_dir).map_err(|e| PackageError::io(&logs_dir, e))?;

    let name = &self.settings.meta_name;
    let stamp = Utc::now().format("%Y%m%d%H%M%S%6fZ");

    let files = MetaFiles {
      list: meta_dir.join(format!("{name}.json")),
      update: meta_dir.join(format!("{name}_update.json")),
      list_log: logs_dir.join(format!("{name}_{stamp}.log")),
      update_log: logs_dir.join(format!("{name}_update_{stamp}.log")),
    };

    write_atomic(&files.list, serde_json::to_string_pretty(list)?.as_bytes())
      .map_err(|e| PackageError::io(&files.list, e))?;
    write_atomic(&files.update, serde_json::to_string_pretty(update)?.as_bytes())
      .map_err(|e| PackageError::io(&files.update, e))?;
    append_jsonl(&files.list_log, &list.content)?;
    append_jsonl(&files.update_log, &update.content)?;

    Ok(files)
  }

  /// Pack the host's staging tree into `<tars>/<tarname>.tar.gz`.
  pub fn bundle(&self, host: &Host) -> Result<PathBuf, PackageError> {
    let tar_path = host.tar_path(self.layout.tars_dir());
    write_bundle(&self.layout.host_dir(&host.hostname), &self.settings.bundle_root, &tar_path)?;
    debug!(host = %host.hostname, bundle = %tar_path.display(), "bundle written");
    Ok(tar_path)
  }
}

fn append_jsonl(path: &Path, apps: &[Application]) -> Result<(), PackageError> {
  let mut file = fs::OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .map_err(|e| PackageError::io(path, e))?;
  for app in apps {
    let line = serde_json::to_string(app)?;
    writeln!(file, "{line}").map_err(|e| PackageError::io(path, e))?;
  }
  Ok(())
}

/// Render placeholders in every text file under `dir`, except version files.
fn template_directory(dir: &Path, bindings: &Value) -> Result<(), PackageError> {
  for entry in WalkDir::new(dir).sort_by_file_name() {
    let entry = entry.map_err(|e| PackageError::io(dir, e.into()))?;
    if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with(VERSION_FILE_PREFIX) {
      continue;
    }
    let path = entry.path();
    let Ok(text) = fs::read_to_string(path) else {
      debug!(path = %path.display(), "skipping non-text file");
      continue;
    };
    if !template::has_placeholders(&text) {
      continue;
    }
    let rendered = template::render(&text, bindings).map_err(|source| PackageError::Template {
      path: path.to_path_buf(),
      source,
    })?;
    fs::write(path, rendered).map_err(|e| PackageError::io(path, e))?;
  }
  Ok(())
}

#[cfg(unix)]
fn set_executable(dir: &Path) -> Result<(), PackageError> {
  use std::os::unix::fs::PermissionsExt;

  for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
    if entry.file_type().is_file() {
      fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o755))
        .map_err(|e| PackageError::io(entry.path(), e))?;
    }
  }
  Ok(())
}

#[cfg(not(unix))]
fn set_executable(_dir: &Path) -> Result<(), PackageError> {
  Ok(())
}

fn stamp_app_conf(app_dir: &Path, abbrev: &str) -> Result<(), PackageError> {
  let default_conf = app_dir.join(DEFAULT_APP_CONF);
  let current = match fs::read_to_string(&default_conf) {
    Ok(text) => text,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
    Err(e) => return Err(PackageError::io(&default_conf, e)),
  };
  let (stamped, version) = stamp_launcher_version(&current, abbrev);
  write_atomic(&default_conf, stamped.as_bytes()).map_err(|e| PackageError::io(&default_conf, e))?;
  debug!(path = %default_conf.display(), %version, "stamped application version");

  let local_conf = app_dir.join(LOCAL_APP_CONF);
  if let Ok(text) = fs::read_to_string(&local_conf) {
    write_atomic(&local_conf, remove_launcher_version(&text).as_bytes())
      .map_err(|e| PackageError::io(&local_conf, e))?;
  } else if local_conf.exists() {
    warn!(path = %local_conf.display(), "could not read local app.conf");
  }
  Ok(())
}
