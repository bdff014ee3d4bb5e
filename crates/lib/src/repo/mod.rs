//! The source repository checkout.
//!
//! Cloning and reading commits go through `gix`; checkout, reset, clean and
//! pull go through the `git` binary in the checkout directory.
//!
//! # Layout
//!
//! ```text
//! {scratch}/<repo name>/
//! ├── configs/
//! │   ├── deploymentmethods.conf
//! │   └── <manifest>.csv
//! └── <apps dir>/<application>/...
//! ```

mod git;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::app::{CommitLog, Track};
use crate::consts::CONFIG_DIR;
use crate::util::fs::remove_path;

#[derive(Debug, Error)]
pub enum RepoError {
  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("failed to read commit '{rev}': {message}")]
  Commit { rev: String, message: String },

  #[error("failed to run git {args}: {source}")]
  Spawn {
    args: String,
    #[source]
    source: std::io::Error,
  },

  #[error("git {args} failed: {output}")]
  Git { args: String, output: String },

  #[error("checkout of '{rev}' is corrupted and could not be recovered: {output}")]
  CorruptCheckout { rev: String, output: String },

  #[error("failed to prepare repository directory '{path}': {source}")]
  Prepare {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// How [`RepoManager::sync`] found the checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  Cloned,
  Existing,
}

/// Result of pulling the tracked branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
  /// The pull touched the manifest.
  pub manifest_changed: bool,
  pub output: String,
}

#[derive(Debug, Clone)]
pub struct RepoManager {
  url: String,
  branch: String,
  path: PathBuf,
  checked_out: Option<String>,
}

impl RepoManager {
  pub fn new(url: &str, branch: &str, scratch_dir: &Path) -> Self {
    Self {
      url: url.to_string(),
      branch: branch.to_string(),
      path: scratch_dir.join(repo_name(url)),
      checked_out: None,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn config_path(&self, file_name: &str) -> PathBuf {
    self.path.join(CONFIG_DIR).join(file_name)
  }

  /// Clone the repository unless a checkout already exists. `force` starts from scratch.
  pub fn sync(&mut self, force: bool) -> Result<SyncOutcome, RepoError> {
    if force {
      info!(path = %self.path.display(), "removing repository checkout");
      remove_path(&self.path).map_err(|source| RepoError::Prepare {
        path: self.path.clone(),
        source,
      })?;
      self.checked_out = None;
    }

    if self.path.join(".git").exists() {
      debug!(path = %self.path.display(), "using existing checkout");
      return Ok(SyncOutcome::Existing);
    }

    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| RepoError::Prepare {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    info!(url = %self.url, branch = %self.branch, path = %self.path.display(), "cloning repository");
    if let Err(err) = clone_repo(&self.url, &self.path) {
      let _ = remove_path(&self.path);
      return Err(err);
    }
    self.checkout(None)?;
    Ok(SyncOutcome::Cloned)
  }

  /// Check out `rev`, or the tracked branch when `None`.
  ///
  /// A failed checkout gets one recovery attempt: hard reset to the branch,
  /// remove untracked files, retry.
  pub fn checkout(&mut self, rev: Option<&str>) -> Result<(), RepoError> {
    let target = rev.unwrap_or(&self.branch).to_string();
    if self.checked_out.as_deref() == Some(target.as_str()) {
      return Ok(());
    }

    let first = git::run(&self.path, &["checkout", &target])?;
    if !first.success {
      warn!(rev = %target, output = %first.output, "possible corrupted checkout, resetting");
      let reset = git::run(&self.path, &["reset", "--hard", &self.branch])?;
      if reset.success {
        git::run(&self.path, &["clean", "-fd"])?;
      }
      let retry = git::run(&self.path, &["checkout", &target])?;
      if !retry.success {
        return Err(RepoError::CorruptCheckout {
          rev: target,
          output: retry.output,
        });
      }
    }

    debug!(rev = %target, "checked out");
    self.checked_out = Some(target);
    Ok(())
  }

  /// Pull the tracked branch and report whether the manifest moved. `dry_run` skips the pull.
  pub fn check_for_update(&mut self, manifest_name: &str, dry_run: bool) -> Result<UpdateCheck, RepoError> {
    self.checkout(None)?;
    if dry_run {
      return Ok(UpdateCheck {
        manifest_changed: false,
        output: String::new(),
      });
    }

    let pull = git::run(&self.path, &["pull"])?;
    if !pull.success {
      return Err(RepoError::Git {
        args: "pull".to_string(),
        output: pull.output,
      });
    }
    Ok(UpdateCheck {
      manifest_changed: pull.output.contains(manifest_name),
      output: pull.output,
    })
  }

  /// Commit metadata of `rev`, or of the current checkout.
  pub fn commit_log(&self, rev: Option<&str>) -> Result<CommitLog, RepoError> {
    let rev = rev.unwrap_or("HEAD");
    let commit_error = |message: String| RepoError::Commit {
      rev: rev.to_string(),
      message,
    };

    let repo = gix::open(&self.path).map_err(|e| RepoError::Open {
      path: self.path.clone(),
      source: Box::new(e),
    })?;
    let id = repo.rev_parse_single(rev).map_err(|e| commit_error(e.to_string()))?;
    let commit = repo
      .find_commit(id.detach())
      .map_err(|e| commit_error(e.to_string()))?;
    let author = commit.author().map_err(|e| commit_error(e.to_string()))?;
    let message = commit.message().map_err(|e| commit_error(e.to_string()))?;

    Ok(CommitLog {
      commit_id: commit.id().to_string(),
      abbrev_commit_id: commit.id().shorten_or_id().to_string(),
      author_name: author.name.to_string(),
      author_email: author.email.to_string(),
      subject: message.summary().to_string(),
    })
  }

  /// Record the pushed commit on the run's track.
  pub fn stamp_track(&self, track: &mut Track) -> Result<(), RepoError> {
    let log = self.commit_log(None)?;
    track.push_commit_id = Some(log.commit_id);
    track.push_abbrev_commit_id = Some(log.abbrev_commit_id);
    Ok(())
  }
}

/// Directory name a clone of `url` lands in.
pub fn repo_name(url: &str) -> String {
  let last = url.trim_end_matches('/').rsplit(['/', ':']).next().unwrap_or(url);
  last.split('.').next().unwrap_or(last).to_string()
}

fn clone_repo(url: &str, dest: &Path) -> Result<(), RepoError> {
  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| RepoError::Clone {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| RepoError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| RepoError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(())
}
