use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::{AppStatus, StatusSet, Track};
use crate::context::RunContext;
use crate::deploy::{PhaseWorker, SnapshotFetchWorker};
use crate::host::{Host, HostNameFormat, HostRegistry};
use crate::manifest::{AssignOptions, Manifest, assign_apps};
use crate::method::DeploymentMethods;
use crate::package::{PackageError, StageSettings, Stager, StagingLayout};
use crate::reconcile::{DirectoryArtifacts, ReconcileOptions, Reconciliation, reconcile};
use crate::remote::{RemoteShell, ensure_connected};
use crate::schedule::{BootOrder, dispatch, plan_stages, run_stages};
use crate::snapshot::MetaSnapshot;

use super::events::log_app_events;
use super::{HostSummary, RunError, RunMode, RunOptions, RunPaths, RunReport, SourceTree};

/// Everything loaded before reconciliation starts.
pub struct Rollout<S> {
  pub ctx: Arc<RunContext<S>>,
  pub registry: HostRegistry,
  pub manifest: Manifest,
  pub methods: DeploymentMethods,
  pub format: HostNameFormat,
  pub track: Track,
  pub options: RunOptions,
  pub paths: RunPaths,
}

impl<S: RemoteShell + 'static> Rollout<S> {
  /// Reconcile every host, stage the ones that changed and roll them out.
  pub async fn execute<T: SourceTree>(mut self, tree: &mut T) -> Result<RunReport, RunError> {
    let mode = self.options.mode;

    // 1. Snapshots for hosts not cached locally
    if mode == RunMode::Deploy {
      self.prefetch_snapshots().await;
    }
    for host in self.registry.iter_mut() {
      host.manifest_found = self.ctx.snapshots.exists(&host.hostname);
    }

    // 2. Desired applications per host
    let assign = AssignOptions {
      source: &self.options.refname,
      firstrun: self.options.firstrun,
      format: &self.format,
      track: &self.track,
    };
    assign_apps(&self.manifest, &mut self.registry, &self.methods, &assign)?;

    // 3. Reconcile, then stage and bundle changed hosts
    let head = tree.commit_log()?;
    let reconcile_options = ReconcileOptions {
      strict_commit_ids: self.options.strict_commit_ids,
      head_commit_id: Some(head.commit_id.clone()),
    };
    let artifacts = DirectoryArtifacts::new(tree.root().join(&self.options.apps_folder));
    let stager = self.stager(tree)?;

    let mut errors = Vec::new();
    let mut summaries = Vec::new();
    let mut baselines = Vec::new();
    let hostnames: Vec<String> = self.registry.iter().map(|h| h.hostname.clone()).collect();

    for hostname in hostnames {
      let Some(host) = self.registry.get_mut(&hostname) else {
        continue;
      };
      let desired = host.apps(&self.options.refname).to_vec();
      if desired.is_empty() {
        warn!(host = %hostname, "host has no applications");
        continue;
      }

      let previous = match self.ctx.snapshots.load(&hostname) {
        Ok(previous) => previous,
        Err(e) => {
          error!(host = %hostname, error = %e, "failed to load local snapshot");
          None
        }
      };
      if previous.is_none() && !self.options.dry_run && mode == RunMode::Deploy {
        warn!(host = %hostname, "no snapshot found for host");
      }
      host.first_install = previous.is_none();

      let mut reconciliation = reconcile(&hostname, &desired, previous.as_ref(), &artifacts, &reconcile_options);
      errors.extend(reconciliation.errors.iter().map(ToString::to_string));
      if reconciliation.is_unchanged() {
        debug!(host = %hostname, "no changes");
        continue;
      }

      let mut summary = summarize(&reconciliation);
      info!(
        host = %hostname,
        added = summary.added.len(),
        changed = summary.changed.len(),
        deleted = summary.deleted.len(),
        "changes found"
      );

      if mode == RunMode::Plan {
        summaries.push(summary);
        continue;
      }

      // the host keeps its current state until every application resolves
      if !reconciliation.errors.is_empty() {
        error!(host = %hostname, errors = reconciliation.errors.len(), "application errors, host not rolled out");
        summary.failures.push("not rolled out: application errors".to_string());
        summaries.push(summary);
        continue;
      }

      if !ensure_connected(&self.ctx.shell, host).await {
        summary.connectivity = host.connectivity;
        summary.failures.push("host unreachable".to_string());
        summaries.push(summary);
        continue;
      }

      match stage_host(&stager, tree, host, &mut reconciliation, &self.track) {
        Ok(update) => {
          if self.options.logging_path.is_some() {
            log_app_events(&reconciliation);
          }
          baselines.push((hostname.clone(), reconciliation.list_snapshot(&self.track)));
          host.updates = Some(update);
        }
        Err(StageFailure::Package(e)) => {
          error!(host = %hostname, error = %e, "failed to stage host");
          host.failures.push(e.to_string());
        }
        Err(StageFailure::Fatal(e)) => return Err(e),
      }
      summaries.push(summary);
    }
    tree.checkout(None)?;

    let changed = self.registry.iter().any(Host::has_updates);

    // 4. Persist new baselines and roll out, stage by stage
    if changed {
      for (hostname, list) in &baselines {
        self.ctx.snapshots.save(hostname, list)?;
      }
      let boot_order = BootOrder::parse(&self.options.boot_order).expand(&self.registry.classes());
      let stages = plan_stages(self.registry.iter(), &boot_order, self.options.site_override);
      info!(stages = stages.len(), "starting host updates");
      let ctx = self.ctx.clone();
      run_stages(&mut self.registry, &stages, self.options.num_connections, |stage| {
        Arc::new(PhaseWorker::new(ctx.clone(), stage.phase))
      })
      .await;
      info!("host updates finished");
    }

    let report_changed = changed || (mode == RunMode::Plan && !summaries.is_empty());

    for summary in &mut summaries {
      if let Some(host) = self.registry.get(&summary.hostname) {
        summary.connectivity = host.connectivity;
        for failure in &host.failures {
          if !summary.failures.contains(failure) {
            summary.failures.push(failure.clone());
          }
        }
      }
    }
    Ok(RunReport {
      track: self.track.clone(),
      changed: report_changed,
      mode,
      hosts: summaries,
      errors,
      locked_by: None,
    })
  }

  async fn prefetch_snapshots(&mut self) {
    let missing: Vec<Host> = self
      .registry
      .iter()
      .filter(|h| !self.ctx.snapshots.exists(&h.hostname))
      .cloned()
      .collect();
    if missing.is_empty() {
      return;
    }

    debug!(hosts = missing.len(), "fetching snapshots");
    let worker = Arc::new(SnapshotFetchWorker::new(self.ctx.clone()));
    for outcome in dispatch(missing, self.options.num_connections, worker).await {
      if let Some(host) = self.registry.get_mut(&outcome.hostname) {
        // manifest_found is recomputed from the cache by the caller
        host.connectivity = outcome.connectivity;
        host.failures.extend(outcome.failures);
      }
    }
  }

  fn stager<T: SourceTree>(&self, tree: &T) -> Result<Stager, RunError> {
    let layout = StagingLayout::new(&self.paths.tmp);
    if self.options.mode == RunMode::Deploy {
      layout.reset().map_err(RunError::Staging)?;
    }

    let has_values = self.options.template_values.as_object().is_some_and(|m| !m.is_empty());
    let use_templating = self.options.templating && has_values;
    let settings = StageSettings {
      apps_source: tree.root().join(&self.options.apps_folder),
      bundle_root: self.ctx.layout.bundle_root().to_string(),
      meta_name: self.options.meta_name(),
      global_ignore: self.options.install_ignore.clone(),
      inclusion_file: self.methods.inclusion_file().map(str::to_string),
      template_values: use_templating.then(|| self.ctx.template_values.clone()),
    };
    Ok(Stager::new(layout, settings))
  }
}

enum StageFailure {
  /// Only this host is affected.
  Package(PackageError),
  Fatal(RunError),
}

/// Copy every application with new content, write the snapshot files and bundle.
///
/// Returns the update snapshot handed to the deploy workers.
fn stage_host<T: SourceTree>(
  stager: &Stager,
  tree: &mut T,
  host: &Host,
  reconciliation: &mut Reconciliation,
  track: &Track,
) -> Result<MetaSnapshot, StageFailure> {
  let fatal = |e: crate::repo::RepoError| StageFailure::Fatal(e.into());

  for app in reconciliation
    .apps
    .iter_mut()
    .filter(|a| StatusSet::CHANGED_ONLY.contains(a.status()))
  {
    tree.checkout(app.commit_id.as_deref()).map_err(fatal)?;
    app.commit_log = Some(tree.commit_log().map_err(fatal)?);
    stager.stage_app(host, app).map_err(StageFailure::Package)?;
  }

  let list = reconciliation.list_snapshot(track);
  let update = reconciliation.update_snapshot(track);
  stager
    .write_meta(&host.hostname, &list, &update)
    .map_err(StageFailure::Package)?;
  stager.bundle(host).map_err(StageFailure::Package)?;
  Ok(update)
}

fn summarize(reconciliation: &Reconciliation) -> HostSummary {
  let mut summary = HostSummary {
    hostname: reconciliation.hostname.clone(),
    ..HostSummary::default()
  };
  for app in &reconciliation.apps {
    let bucket = match app.status() {
      AppStatus::Added => &mut summary.added,
      AppStatus::Changed => &mut summary.changed,
      AppStatus::Deleted => &mut summary.deleted,
      AppStatus::Unchanged => continue,
    };
    bucket.push(app.name.clone());
  }
  summary
}
