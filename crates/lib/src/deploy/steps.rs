use std::collections::BTreeSet;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::app::{AppStatus, StatusSet};
use crate::command::ResolvedCommand;
use crate::consts::{META_LOG_RETENTION_DAYS, VERSION_FILE_PREFIX};
use crate::context::RunContext;
use crate::host::{Connectivity, Host};
use crate::remote::{CommandOutput, RemoteShell, shell_quote};
use crate::snapshot::MetaSnapshot;

use super::DeployError;

/// Which install commands to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Selection {
  All,
  PreInstall,
  PostUnpack,
}

impl Selection {
  fn admits(self, command: &ResolvedCommand) -> bool {
    match self {
      Selection::All => true,
      Selection::PreInstall => command.spec.pre_install,
      Selection::PostUnpack => !command.spec.pre_install,
    }
  }
}

/// Record a failure on the host. Connection failures also mark it unreachable.
pub(super) fn note_failure(host: &mut Host, err: &DeployError) {
  error!(host = %host.hostname, error = %err, "deploy step failed");
  if err.is_connection() {
    host.connectivity = Connectivity::Unreachable;
  }
  host.failures.push(err.to_string());
}

/// Run the selected commands in order. Only connection failures stop the loop.
pub(super) async fn run_commands<S: RemoteShell>(
  ctx: &RunContext<S>,
  host: &mut Host,
  commands: &[ResolvedCommand],
  selection: Selection,
) -> Result<(), DeployError> {
  let binary = ctx.layout.app_binary();

  for command in commands.iter().filter(|c| selection.admits(c)) {
    if let Err(reason) = command.spec.eligibility(host) {
      if reason.is_quiet() || command.spec.suppress_limit_to_hosts_warnings {
        debug!(host = %host.hostname, command = %command.name(), %reason, "skipping command");
      } else {
        warn!(host = %host.hostname, command = %command.name(), %reason, "host not eligible for command");
      }
      continue;
    }

    let line = command.command_line(&binary);
    info!(host = %host.hostname, command = %command.name(), cmd = %command.display_line(&binary), "running command");

    let output = if command.needs_interactive() {
      ctx.shell.exec_interactive(host, &line, &command.hidden).await?
    } else {
      ctx.shell.exec(host, &line).await?
    };

    if output.is_success() {
      debug!(host = %host.hostname, command = %command.name(), stdout = %output.stdout, "command finished");
    } else {
      let err = DeployError::Step {
        step: format!("command '{}'", command.name()),
        exit_code: output.exit_code,
        output: output.stderr.trim().to_string(),
      };
      warn!(host = %host.hostname, command = %command.name(), exit_code = output.exit_code, "command failed");
      host.failures.push(err.to_string());
    }

    if !ctx.dry_run && !command.spec.delay.is_zero() {
      debug!(host = %host.hostname, delay = ?command.spec.delay, "waiting after command");
      sleep(command.spec.delay).await;
    }
  }

  Ok(())
}

/// Remove the install paths of deleted and delete-first applications.
pub(super) async fn delete_apps<S: RemoteShell>(
  ctx: &RunContext<S>,
  host: &mut Host,
  updates: &MetaSnapshot,
) -> Result<(), DeployError> {
  let apps_dir = ctx.layout.apps_dir();
  let paths: BTreeSet<String> = updates
    .content
    .iter()
    .filter(|app| app.status() == AppStatus::Deleted || (app.method.delete_first && app.status().is_updated()))
    .map(|app| app.install_path(apps_dir))
    .collect();

  for path in paths {
    if !ctx.layout.contains(&path) {
      let err = DeployError::OutsideAppsDir {
        path,
        apps_dir: apps_dir.to_string(),
      };
      note_failure(host, &err);
      continue;
    }
    info!(host = %host.hostname, path = %path, "removing application");
    let output = ctx.shell.exec(host, &ctx.layout.privileged(&format!("rm -rf {}", shell_quote(&path)))).await?;
    check_step(host, "remove application", output);
  }
  Ok(())
}

/// Drop version files of changed applications so only the new one remains.
pub(super) async fn clear_version_files<S: RemoteShell>(
  ctx: &RunContext<S>,
  host: &mut Host,
  updates: &MetaSnapshot,
) -> Result<(), DeployError> {
  for app in updates.content.iter().filter(|a| a.status() == AppStatus::Changed) {
    let path = app.install_path(ctx.layout.apps_dir());
    if !ctx.layout.contains(&path) {
      continue;
    }
    // the glob stays outside the quotes
    let command = ctx
      .layout
      .privileged(&format!("rm -f {}/{VERSION_FILE_PREFIX}*", shell_quote(&path)));
    let output = ctx.shell.exec(host, &command).await?;
    check_step(host, "clear version files", output);
  }
  Ok(())
}

/// Upload the bundle to the remote home directory and unpack it.
///
/// Returns whether the bundle was unpacked.
pub(super) async fn install_bundle<S: RemoteShell>(ctx: &RunContext<S>, host: &mut Host) -> Result<bool, DeployError> {
  let changed = host
    .updates
    .as_ref()
    .is_some_and(|u| u.select(StatusSet::TO_UPDATE).next().is_some());
  // deletions still ship the new snapshot files
  if !changed {
    debug!(host = %host.hostname, "nothing to ship");
    return Ok(true);
  }

  let tar_path = host.tar_path(&ctx.tars_dir);
  let remote_name = format!("{}.tar.gz", host.tarname);

  info!(host = %host.hostname, bundle = %tar_path.display(), "uploading bundle");
  ctx.shell.upload(host, &tar_path, &remote_name).await?;

  let untar = ctx.layout.privileged(&format!(
    "tar -zxvf {} -C {}",
    shell_quote(&remote_name),
    shell_quote(ctx.layout.base_location())
  ));
  let output = ctx.shell.exec(host, &untar).await?;
  let unpacked = check_step(host, "unpack bundle", output);

  let output = ctx.shell.exec(host, &format!("rm -rf {}", shell_quote(&format!("./{remote_name}")))).await?;
  check_step(host, "remove uploaded bundle", output);

  if !unpacked && let Err(e) = ctx.snapshots.invalidate(&host.hostname) {
    warn!(host = %host.hostname, error = %e, "failed to invalidate local snapshot");
  }
  Ok(unpacked)
}

/// Replace the local snapshot with the one installed on the host.
pub(super) async fn fetch_snapshot<S: RemoteShell>(ctx: &RunContext<S>, host: &mut Host) -> Result<(), DeployError> {
  if ctx.dry_run {
    debug!(host = %host.hostname, "dry run: not fetching snapshot");
    return Ok(());
  }

  let output = ctx.shell.exec(host, &format!("cat {}", shell_quote(&ctx.layout.meta_file()))).await?;
  if !output.is_success() || output.stdout.trim().is_empty() {
    debug!(host = %host.hostname, exit_code = output.exit_code, "no snapshot on host");
    host.manifest_found = false;
    return Ok(());
  }

  let snapshot = ctx.snapshots.save_raw(&host.hostname, output.stdout.trim())?;
  host.manifest_found = true;
  debug!(host = %host.hostname, apps = snapshot.content.len(), "fetched snapshot");
  Ok(())
}

/// Delete remote meta logs older than the retention period.
pub(super) async fn rotate_logs<S: RemoteShell>(ctx: &RunContext<S>, host: &mut Host) -> Result<(), DeployError> {
  let logs = ctx.layout.logs_dir();
  if !ctx.layout.contains(&logs) {
    return Ok(());
  }
  let command = format!("find {} -type f -mtime +{META_LOG_RETENTION_DAYS} -delete", shell_quote(&logs));
  let output = ctx.shell.exec(host, &command).await?;
  check_step(host, "rotate logs", output);
  Ok(())
}

/// Record a non-zero exit as a failure. Returns whether the step succeeded.
fn check_step(host: &mut Host, step: &str, output: CommandOutput) -> bool {
  if output.is_success() {
    return true;
  }
  let err = DeployError::Step {
    step: step.to_string(),
    exit_code: output.exit_code,
    output: output.stderr.trim().to_string(),
  };
  note_failure(host, &err);
  false
}
