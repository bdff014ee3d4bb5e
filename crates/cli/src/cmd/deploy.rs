//! Implementation of the `fleetroll deploy` command.
//!
//! Syncs the repository, reconciles every host against its last snapshot and
//! rolls the changes out stage by stage.

use anyhow::{Context, Result};
use tracing::{debug, error};

use fleetroll_lib::orchestrate::{self, RunMode};

use crate::logging::Logging;
use crate::output::{OutputFormat, print_report};
use crate::settings::RunArgs;

/// Returns whether the run succeeded; `false` maps to exit status 1.
pub fn cmd_deploy(args: &RunArgs, logging: Logging, format: OutputFormat) -> Result<bool> {
  rollout(args, RunMode::Deploy, logging, format)
}

pub(super) fn rollout(args: &RunArgs, mode: RunMode, logging: Logging, format: OutputFormat) -> Result<bool> {
  let options = match args.resolve(mode) {
    Ok(options) => options,
    Err(e) => {
      logging.init_console()?;
      return Err(e);
    }
  };
  match &options.logging_path {
    Some(dir) => logging.init_with_files(dir, &options.refname)?,
    None => logging.init_console()?,
  }
  debug!(
    refname = %options.refname,
    scratch = %options.scratch_dir.display(),
    hosts = options.hosts.len(),
    dry_run = options.dry_run,
    "settings resolved"
  );

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = match rt.block_on(orchestrate::run(&options)) {
    Ok(report) => report,
    Err(e) => {
      error!(refname = %options.refname, error = %e, "run failed");
      return Err(e).with_context(|| format!("Run '{}' failed", options.refname));
    }
  };

  print_report(&report, format)?;
  Ok(report.is_success())
}
