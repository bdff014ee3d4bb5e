use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::command::ResolvedCommand;
use crate::consts::RESTART_COMMAND;
use crate::context::RunContext;
use crate::host::{Host, HostOutcome};
use crate::method::Phase;
use crate::remote::{RemoteShell, ensure_connected};
use crate::schedule::HostWorker;

use super::DeployError;
use super::steps::{
  Selection, clear_version_files, delete_apps, fetch_snapshot, install_bundle, note_failure, rotate_logs, run_commands,
};

/// Runs one command phase on each host it is handed.
pub struct PhaseWorker<S> {
  ctx: Arc<RunContext<S>>,
  phase: Phase,
}

impl<S> PhaseWorker<S> {
  pub fn new(ctx: Arc<RunContext<S>>, phase: Phase) -> Self {
    Self { ctx, phase }
  }
}

impl<S: RemoteShell> PhaseWorker<S> {
  async fn deploy(&self, host: &mut Host) -> Result<(), DeployError> {
    let Some(updates) = host.updates.clone() else {
      return Ok(());
    };

    let bindings = self.ctx.bindings_for(&host.template_bindings());
    let mut commands = self.ctx.commands.resolve(updates.commands(self.phase), &bindings)?;

    if self.phase != Phase::Install {
      return run_commands(&self.ctx, host, &commands, Selection::All).await;
    }

    run_commands(&self.ctx, host, &commands, Selection::PreInstall).await?;
    delete_apps(&self.ctx, host, &updates).await?;
    clear_version_files(&self.ctx, host, &updates).await?;

    if !install_bundle(&self.ctx, host).await? {
      warn!(host = %host.hostname, "bundle not unpacked, skipping install commands");
      return Ok(());
    }

    if (updates.restart() || host.restart) && !has_restart(&commands) {
      debug!(host = %host.hostname, "adding restart");
      commands.extend(self.ctx.commands.resolve(&[RESTART_COMMAND.to_string()], &bindings)?);
    }
    run_commands(&self.ctx, host, &commands, Selection::PostUnpack).await?;

    fetch_snapshot(&self.ctx, host).await?;
    rotate_logs(&self.ctx, host).await
  }
}

#[async_trait]
impl<S: RemoteShell + 'static> HostWorker for PhaseWorker<S> {
  async fn run(&self, mut host: Host) -> HostOutcome {
    if !ensure_connected(&self.ctx.shell, &mut host).await {
      warn!(host = %host.hostname, phase = %self.phase, "skipping unreachable host");
      self.forget_snapshot(&host);
      return host.outcome();
    }

    info!(host = %host.hostname, phase = %self.phase, "deploying");
    if let Err(e) = self.deploy(&mut host).await {
      if e.is_connection() {
        self.forget_snapshot(&host);
      }
      note_failure(&mut host, &e);
    }
    host.outcome()
  }
}

impl<S> PhaseWorker<S> {
  /// The cached baseline no longer matches the host; make the next run fetch it.
  fn forget_snapshot(&self, host: &Host) {
    if let Err(e) = self.ctx.snapshots.invalidate(&host.hostname) {
      warn!(host = %host.hostname, error = %e, "failed to invalidate local snapshot");
    }
  }
}

fn has_restart(commands: &[ResolvedCommand]) -> bool {
  commands.iter().any(|c| c.name() == RESTART_COMMAND)
}

/// Pulls the snapshot installed on each host into the local cache.
pub struct SnapshotFetchWorker<S> {
  ctx: Arc<RunContext<S>>,
}

impl<S> SnapshotFetchWorker<S> {
  pub fn new(ctx: Arc<RunContext<S>>) -> Self {
    Self { ctx }
  }
}

#[async_trait]
impl<S: RemoteShell + 'static> HostWorker for SnapshotFetchWorker<S> {
  async fn run(&self, mut host: Host) -> HostOutcome {
    host.manifest_found = self.ctx.snapshots.exists(&host.hostname);
    if host.manifest_found || self.ctx.dry_run {
      return host.outcome();
    }

    if ensure_connected(&self.ctx.shell, &mut host).await
      && let Err(e) = fetch_snapshot(&self.ctx, &mut host).await
    {
      note_failure(&mut host, &e);
    }
    host.outcome()
  }
}
