//! Status command implementation.
//!
//! Shows whether a run holds the lock and the snapshot cached for every host.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;

use fleetroll_lib::orchestrate::{RunMode, RunPaths};
use fleetroll_lib::run_lock::{LockMetadata, RunLock};
use fleetroll_lib::snapshot::SnapshotStore;

use crate::output::{self, OutputFormat, format_age, print_error, print_info, print_json, print_stat, print_success};
use crate::settings::RunArgs;

#[derive(Debug, Clone, Default, Args)]
pub struct StatusArgs {
  /// INI file with defaults, in a [fleetroll] section
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  #[arg(long, value_name = "NAME")]
  pub ref_name: Option<String>,

  #[arg(long, value_name = "DIR")]
  pub scratch_dir: Option<PathBuf>,

  /// List the applications of every host
  #[arg(short, long)]
  pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct HostStatus {
  hostname: String,
  applications: Vec<String>,
  run_version: String,
  updated_at: String,
}

#[derive(Debug, Serialize)]
struct StatusReport {
  refname: String,
  scratch_dir: PathBuf,
  #[serde(skip_serializing_if = "Option::is_none")]
  running: Option<LockMetadata>,
  hosts: Vec<HostStatus>,
}

pub fn cmd_status(args: &StatusArgs, format: OutputFormat) -> Result<()> {
  let run_args = RunArgs {
    config: args.config.clone(),
    ref_name: args.ref_name.clone(),
    scratch_dir: args.scratch_dir.clone(),
    ..RunArgs::default()
  };
  let options = run_args.resolve(RunMode::Plan)?;
  let paths = RunPaths::new(&options.scratch_dir, &options.refname);
  let store = SnapshotStore::new(paths.meta.clone(), &options.meta_name());

  let running = RunLock::is_held(&paths.root).then(|| RunLock::holder(&paths.root)).flatten();

  let mut hosts = Vec::new();
  for hostname in store.list_hosts().context("Failed to list cached snapshots")? {
    match store.load(&hostname) {
      Ok(Some(snapshot)) => {
        let mut applications: Vec<String> = snapshot.content.iter().map(|a| a.name.clone()).collect();
        applications.sort();
        hosts.push(HostStatus {
          hostname,
          applications,
          run_version: snapshot.track.version.clone(),
          updated_at: snapshot.created_at.to_rfc3339(),
        });
      }
      Ok(None) => {}
      Err(e) => print_error(&format!("Error loading snapshot of {}: {}", hostname, e)),
    }
  }

  let report = StatusReport {
    refname: options.refname,
    scratch_dir: paths.root,
    running,
    hosts,
  };
  if format.is_json() {
    return print_json(&report);
  }

  match &report.running {
    Some(holder) => print_info(&format!(
      "Run in progress: '{}' (pid {}, started {} ago)",
      holder.command,
      holder.pid,
      format_age(holder.started_at, Utc::now())
    )),
    None => print_success("No run in progress"),
  }
  print_stat("Ref", &report.refname);
  print_stat("Scratch", &report.scratch_dir.display().to_string());

  if report.hosts.is_empty() {
    println!();
    print_info("No cached snapshots. Run 'fleetroll deploy' to create them.");
    return Ok(());
  }

  println!();
  for host in &report.hosts {
    println!(
      "  {} {} {} app(s), run {}, {}",
      output::symbols::INFO,
      host.hostname,
      host.applications.len(),
      host.run_version,
      host.updated_at
    );
    if args.verbose {
      for app in &host.applications {
        println!("      {}", app);
      }
    }
  }
  Ok(())
}
