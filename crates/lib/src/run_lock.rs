//! Exclusive lock preventing overlapping runs on one scratch directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const LOCK_FILENAME: &str = ".lock";
const LOCK_METADATA_VERSION: u32 = 1;

/// Who holds the lock, written into the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at: DateTime<Utc>,
  pub command: String,
  pub scratch_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum RunLockError {
  #[error("another run holds {}{}", lock_path.display(), describe(holder.as_ref()))]
  Contention {
    holder: Option<LockMetadata>,
    lock_path: PathBuf,
  },

  #[error("failed to create scratch directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

fn describe(holder: Option<&LockMetadata>) -> String {
  match holder {
    Some(m) => format!(": {} (pid {}, started {})", m.command, m.pid, m.started_at.to_rfc3339()),
    None => String::new(),
  }
}

/// Held for the duration of a run; released when dropped.
#[derive(Debug)]
pub struct RunLock {
  file: File,
  lock_path: PathBuf,
}

impl RunLock {
  /// Take the lock under `scratch_dir` without waiting.
  pub fn acquire(scratch_dir: &Path, command: &str) -> Result<Self, RunLockError> {
    std::fs::create_dir_all(scratch_dir).map_err(RunLockError::CreateDir)?;
    let lock_path = scratch_dir.join(LOCK_FILENAME);

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(RunLockError::OpenFile)?;

    if let Err(err) = try_lock(&file) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(RunLockError::Contention {
          holder: Self::holder(scratch_dir),
          lock_path,
        });
      }
      return Err(RunLockError::LockFailed(err));
    }

    let metadata = LockMetadata {
      version: LOCK_METADATA_VERSION,
      pid: std::process::id(),
      started_at: Utc::now(),
      command: command.to_string(),
      scratch_dir: scratch_dir.to_path_buf(),
    };
    write_metadata(&file, &metadata)?;
    debug!(path = %lock_path.display(), "acquired run lock");

    Ok(RunLock { file, lock_path })
  }

  /// Metadata of the current holder, if the lock file can be read.
  pub fn holder(scratch_dir: &Path) -> Option<LockMetadata> {
    let contents = std::fs::read_to_string(scratch_dir.join(LOCK_FILENAME)).ok()?;
    serde_json::from_str(&contents).ok()
  }

  /// Whether a live run holds the lock. Never creates the lock file.
  pub fn is_held(scratch_dir: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).open(scratch_dir.join(LOCK_FILENAME)) else {
      return false;
    };
    matches!(try_lock(&file), Err(e) if e.kind() == io::ErrorKind::WouldBlock)
  }

  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, metadata: &LockMetadata) -> Result<(), RunLockError> {
  file.set_len(0).map_err(RunLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, metadata).map_err(|e| RunLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(RunLockError::WriteMetadata)
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> io::Result<()> {
  Ok(())
}
