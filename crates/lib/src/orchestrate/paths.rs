use std::path::{Path, PathBuf};

use crate::util::fs::remove_path;

const META_DIR_NAME: &str = "meta";
const TMP_DIR_NAME: &str = "tmp";

/// Control-side directories of one refname.
///
/// ```text
/// {scratch}/<refname>/
/// ├── .lock
/// ├── <repo name>/     checkout
/// ├── meta/            cached host snapshots
/// └── tmp/             staging, rebuilt every run
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
  pub root: PathBuf,
  pub meta: PathBuf,
  pub tmp: PathBuf,
}

impl RunPaths {
  pub fn new(scratch_dir: &Path, refname: &str) -> Self {
    let root = scratch_dir.join(refname);
    Self {
      meta: root.join(META_DIR_NAME),
      tmp: root.join(TMP_DIR_NAME),
      root,
    }
  }

  /// Remove everything under the root except the lock file.
  pub fn clean(&self) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(&self.root) {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(e),
    };
    for entry in entries {
      let entry = entry?;
      if entry.file_name() != ".lock" {
        remove_path(&entry.path())?;
      }
    }
    Ok(())
  }
}
