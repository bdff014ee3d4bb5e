//! Tracing setup.
//!
//! The console always gets human or JSON lines on stderr. When a logging
//! directory is set, a run also writes two rolling JSON files there: the run
//! log (`fleetroll_<refname>.*.log`, every line carrying the `run` span) and
//! the event log (`event_fleetroll_<refname>.*.log`, one line per application).

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{Directive, EnvFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt};

use fleetroll_lib::consts::APP_NAME;
use fleetroll_lib::orchestrate::EVENT_TARGET;

/// Daily files, kept for five weeks.
const LOG_FILES_KEPT: usize = 35;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
  Text,
  Json,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct Logging {
  pub debug: bool,
  pub format: LogFormat,
}

impl Logging {
  /// Console only.
  pub fn init_console(self) -> Result<()> {
    self.install(vec![self.console()])
  }

  /// Console plus the run and event files of `refname` under `dir`.
  pub fn init_with_files(self, dir: &Path, refname: &str) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create logging path {}", dir.display()))?;

    let level = if self.debug { Level::DEBUG } else { Level::INFO };
    let run_log = appender(dir, &format!("{APP_NAME}_{refname}"))?;
    let event_log = appender(dir, &format!("event_{APP_NAME}_{refname}"))?;

    let run_layer = fmt::layer()
      .json()
      .with_current_span(true)
      .with_span_list(false)
      .with_ansi(false)
      .with_writer(run_log)
      .with_filter(
        Targets::new()
          .with_target(APP_NAME, level)
          .with_target(EVENT_TARGET, LevelFilter::OFF),
      )
      .boxed();
    let event_layer = fmt::layer()
      .json()
      .flatten_event(true)
      .with_current_span(true)
      .with_span_list(false)
      .with_ansi(false)
      .with_writer(event_log)
      .with_filter(Targets::new().with_target(EVENT_TARGET, Level::INFO))
      .boxed();

    self.install(vec![self.console(), run_layer, event_layer])
  }

  fn console(self) -> BoxedLayer {
    let default_level = if self.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // application events belong in their own file
    let filter = match format!("{EVENT_TARGET}=off").parse::<Directive>() {
      Ok(directive) => filter.add_directive(directive),
      Err(_) => filter,
    };
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(self.debug);
    match self.format {
      LogFormat::Text => layer.with_filter(filter).boxed(),
      LogFormat::Json => layer.json().with_filter(filter).boxed(),
    }
  }

  fn install(self, layers: Vec<BoxedLayer>) -> Result<()> {
    tracing_subscriber::registry()
      .with(layers)
      .try_init()
      .context("Failed to initialize logging")
  }
}

fn appender(dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
  RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix(prefix)
    .filename_suffix("log")
    .max_log_files(LOG_FILES_KEPT)
    .build(dir)
    .with_context(|| format!("Failed to open log file {prefix} in {}", dir.display()))
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;
  use tempfile::TempDir;
  use tracing_subscriber::fmt::MakeWriter;

  #[test]
  fn files_are_named_after_the_refname() {
    let dir = TempDir::new().unwrap();
    let appender = appender(dir.path(), "event_fleetroll_repo").unwrap();
    appender.make_writer().write_all(b"{}\n").unwrap();

    let names: Vec<String> = dir
      .path()
      .read_dir()
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("event_fleetroll_repo."), "{names:?}");
    assert!(names[0].ends_with(".log"), "{names:?}");
  }
}
