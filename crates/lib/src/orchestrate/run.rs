use std::sync::Arc;

use tracing::{Instrument, info, info_span, warn};

use crate::app::Track;
use crate::command::CommandSet;
use crate::consts::{COMMANDS_FILENAME, DEPLOYMENT_METHODS_FILENAME};
use crate::context::{RemoteLayout, RunContext, run_template_values};
use crate::host::{HostNameFormat, build_registry};
use crate::manifest::Manifest;
use crate::method::DeploymentMethods;
use crate::package::StagingLayout;
use crate::remote::SshShell;
use crate::repo::{RepoManager, SyncOutcome};
use crate::run_lock::{RunLock, RunLockError};
use crate::snapshot::SnapshotStore;

use super::{Rollout, RunError, RunMode, RunOptions, RunPaths, RunReport};

/// Run one rollout end to end.
///
/// 1. Take the run lock (contention is reported, not an error)
/// 2. Sync the repository; stop early when nothing moved
/// 3. Load deployment methods, commands and the manifest
/// 4. Build the host registry
/// 5. Reconcile, stage and dispatch (see [`Rollout::execute`])
///
/// Everything logged during the run carries the run id and version in a
/// `run` span.
pub async fn run(options: &RunOptions) -> Result<RunReport, RunError> {
  let track = Track::new();
  let span = info_span!(
    "run",
    refname = %options.refname,
    run_id = %track.run_id,
    version = %track.version,
    push_commit_id = tracing::field::Empty
  );
  run_in_span(options, track).instrument(span).await
}

async fn run_in_span(options: &RunOptions, mut track: Track) -> Result<RunReport, RunError> {
  let paths = RunPaths::new(&options.scratch_dir, &options.refname);

  if options.repo_url.is_empty() {
    return Err(RunError::MissingOption("repo-url"));
  }
  if options.mode == RunMode::Deploy && !options.dry_run && options.app_binary.is_empty() {
    return Err(RunError::MissingOption("app-binary"));
  }

  // 1. Lock
  let label = format!("{} {}", mode_name(options.mode), options.refname);
  let _lock = match RunLock::acquire(&paths.root, &label) {
    Ok(lock) => lock,
    Err(RunLockError::Contention { holder, lock_path }) => {
      warn!(path = %lock_path.display(), "another run is in progress");
      let mut report = RunReport::unchanged(track, options.mode);
      report.locked_by = holder;
      return Ok(report);
    }
    Err(e) => return Err(e.into()),
  };
  if options.clean {
    info!(path = %paths.root.display(), "cleaning scratch directory");
    paths.clean().map_err(|source| RunError::Clean {
      path: paths.root.clone(),
      source,
    })?;
  }

  // 2. Repository
  let mut repo = RepoManager::new(&options.repo_url, &options.repo_branch, &paths.root);
  let synced = repo.sync(options.clean_repo)?;
  let offline = options.dry_run || options.mode == RunMode::Plan;
  let update = repo.check_for_update(&options.manifest_name, offline)?;
  repo.stamp_track(&mut track)?;
  if let Some(commit) = &track.push_commit_id {
    tracing::Span::current().record("push_commit_id", commit.as_str());
  }

  let triggered = update.manifest_changed || synced == SyncOutcome::Cloned;
  info!(triggered, output = %update.output, "repository pulled");
  if options.mode == RunMode::Deploy && !options.dry_run && !options.skip_repo_sync && !triggered {
    info!("no repository update found");
    return Ok(RunReport::unchanged(track, options.mode));
  }

  // 3. Configuration
  let methods = DeploymentMethods::load(&repo.config_path(DEPLOYMENT_METHODS_FILENAME))?;
  let commands_path = options
    .commands_file
    .clone()
    .unwrap_or_else(|| repo.config_path(COMMANDS_FILENAME));
  let commands = CommandSet::load(&commands_path)?;
  commands.validate_methods(&methods)?;
  let manifest = Manifest::load(&repo.config_path(&options.manifest_name))?;

  // 4. Hosts
  let format: HostNameFormat = options.name_format.trim_matches(['"', '\'']).parse()?;
  let snapshots = SnapshotStore::new(paths.meta.clone(), &options.meta_name());
  if options.clean_metas {
    info!(path = %paths.meta.display(), "removing cached snapshots");
    snapshots.clean()?;
  }
  let registry = build_registry(&options.hosts, &options.host_classes, &format, |h| snapshots.path_for(h))?;
  if registry.is_empty() {
    return Err(RunError::NoHosts);
  }

  // 5. Rollout
  let mut ssh = options.ssh.clone();
  ssh.dry_run = options.dry_run;
  let ctx = RunContext {
    shell: SshShell::new(ssh),
    commands,
    layout: RemoteLayout::new(&options.remote_apps_dir, &options.app_binary, &options.meta_name()),
    template_values: run_template_values(&options.template_values, &registry),
    tars_dir: StagingLayout::new(&paths.tmp).tars_dir().to_path_buf(),
    snapshots,
    dry_run: options.dry_run,
  };

  info!(
    hosts = registry.len(),
    mode = mode_name(options.mode),
    firstrun = options.firstrun,
    templating = options.templating,
    "rollout started"
  );
  let rollout = Rollout {
    ctx: Arc::new(ctx),
    registry,
    manifest,
    methods,
    format,
    track,
    options: options.clone(),
    paths,
  };
  let report = rollout.execute(&mut repo).await?;
  info!(changed = report.changed, "rollout complete");
  Ok(report)
}

fn mode_name(mode: RunMode) -> &'static str {
  match mode {
    RunMode::Deploy => "deploy",
    RunMode::Plan => "plan",
  }
}
