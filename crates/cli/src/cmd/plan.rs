//! Implementation of the `fleetroll plan` command.
//!
//! Reconciles against the cached snapshots only: nothing is staged, no host
//! is contacted and the repository is not pulled once cloned.

use anyhow::Result;

use fleetroll_lib::orchestrate::RunMode;

use super::deploy::rollout;
use crate::logging::Logging;
use crate::output::{OutputFormat, print_warning};
use crate::settings::RunArgs;

pub fn cmd_plan(args: &RunArgs, logging: Logging, format: OutputFormat) -> Result<bool> {
  if args.firstrun && !format.is_json() {
    print_warning("--firstrun only seeds bootstrap applications on hosts without a cached snapshot");
  }
  rollout(args, RunMode::Plan, logging, format)
}
