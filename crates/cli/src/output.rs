//! CLI output formatting.
//!
//! Human output goes through the colored helpers below; `--output json`
//! prints the same data as one JSON document on stdout.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use fleetroll_lib::app::Track;
use fleetroll_lib::host::Connectivity;
use fleetroll_lib::orchestrate::{HostSummary, RunMode, RunReport};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Whole seconds elapsed since `at`, e.g. `3m 12s`.
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let secs = (now - at).num_seconds().max(0) as u64;
  humantime::format_duration(Duration::from_secs(secs)).to_string()
}

/// The closing line of every run: the track record plus whether anything changed.
#[derive(Debug, Serialize)]
pub struct TrackReport<'a> {
  #[serde(flatten)]
  pub track: &'a Track,
  pub changed: bool,
}

pub fn print_report(report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
  if format.is_json() {
    return print_json(report);
  }

  if let Some(holder) = &report.locked_by {
    print_warning(&format!(
      "Another run holds the lock: '{}' (pid {}, started {} ago)",
      holder.command,
      holder.pid,
      format_age(holder.started_at, Utc::now())
    ));
  }

  for host in &report.hosts {
    print_host(host);
  }

  for error in &report.errors {
    print_error(error);
  }

  let changes: usize = report.hosts.iter().map(HostSummary::change_count).sum();
  match (report.mode, report.changed) {
    (_, false) if report.errors.is_empty() => print_info("No changes"),
    (_, false) => print_error("Application errors found; nothing was rolled out"),
    (RunMode::Plan, true) => print_info(&format!("Would apply {} change(s) on {} host(s)", changes, report.hosts.len())),
    (RunMode::Deploy, true) if !report.has_host_failures() && report.is_success() => print_success(&format!(
      "Applied {} change(s) on {} host(s)",
      changes,
      report.hosts.len()
    )),
    (RunMode::Deploy, true) => print_warning(&format!(
      "Applied {} change(s) on {} host(s), with failures",
      changes,
      report.hosts.len()
    )),
  }

  print_json(&TrackReport {
    track: &report.track,
    changed: report.changed,
  })
}

fn print_host(host: &HostSummary) {
  let name = match host.connectivity {
    Connectivity::Unreachable => format!("{} (unreachable)", host.hostname),
    _ => host.hostname.clone(),
  };
  println!("{}", name.if_supports_color(Stream::Stdout, |s| s.bold()));

  let lines = [
    (symbols::ADD, &host.added),
    (symbols::MODIFY, &host.changed),
    (symbols::REMOVE, &host.deleted),
  ];
  for (symbol, apps) in lines {
    for app in apps {
      let symbol = match symbol {
        symbols::ADD => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
        symbols::MODIFY => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
        _ => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
      };
      println!("  {} {}", symbol, app);
    }
  }
  for failure in &host.failures {
    print_error(&format!("  {}", failure));
  }
}
