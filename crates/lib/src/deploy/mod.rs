//! Per-host rollout work.
//!
//! [`PhaseWorker`] runs one command phase on a host. The install phase also
//! ships the bundle:
//!
//! 1. commands flagged `pre_install`
//! 2. delete paths of deleted and delete-first applications
//! 3. clear stale version files of changed applications
//! 4. upload and unpack the bundle
//! 5. the remaining install commands, with `restart` appended when required
//! 6. refresh the local snapshot from the host
//! 7. rotate old remote meta logs
//!
//! [`SnapshotFetchWorker`] pulls a host's snapshot into the local cache
//! before reconciliation.
//!
//! Failing commands are logged and recorded on the host; the remaining
//! steps still run. A connection failure ends the host's work for the run.

mod steps;
mod worker;

use thiserror::Error;

use crate::command::CommandConfigError;
use crate::remote::RemoteError;
use crate::snapshot::SnapshotError;

pub use worker::{PhaseWorker, SnapshotFetchWorker};

#[derive(Debug, Error)]
pub enum DeployError {
  #[error("failed to resolve commands: {0}")]
  Resolve(#[from] CommandConfigError),

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error("{step} exited with {exit_code}: {output}")]
  Step {
    step: String,
    exit_code: i32,
    output: String,
  },

  #[error("refusing to remove '{path}': not below '{apps_dir}'")]
  OutsideAppsDir { path: String, apps_dir: String },

  #[error("snapshot from host is invalid: {0}")]
  Snapshot(#[from] SnapshotError),
}

impl DeployError {
  /// Errors after which nothing else can be done on the host.
  pub fn is_connection(&self) -> bool {
    matches!(self, DeployError::Remote(_))
  }
}
