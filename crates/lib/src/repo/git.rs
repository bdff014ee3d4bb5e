use std::path::Path;
use std::process::Command;

use tracing::debug;

use super::RepoError;

/// Combined output of one git invocation.
#[derive(Debug, Clone)]
pub(super) struct GitOutput {
  pub(super) success: bool,
  pub(super) output: String,
}

pub(super) fn run(repo: &Path, args: &[&str]) -> Result<GitOutput, RepoError> {
  debug!(repo = %repo.display(), args = ?args, "git");
  let output = Command::new("git")
    .current_dir(repo)
    .args(args)
    .output()
    .map_err(|source| RepoError::Spawn {
      args: args.join(" "),
      source,
    })?;

  let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
  text.push_str(&String::from_utf8_lossy(&output.stderr));
  Ok(GitOutput {
    success: output.status.success(),
    output: text.trim().to_string(),
  })
}
