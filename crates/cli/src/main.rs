//! fleetroll: roll application bundles out to a fleet of hosts.

mod cmd;
mod logging;
mod output;
mod settings;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::cmd::{StatusArgs, cmd_deploy, cmd_plan, cmd_status};
use crate::logging::{LogFormat, Logging};
use crate::output::{OutputFormat, print_error};
use crate::settings::RunArgs;

#[derive(Parser)]
#[command(name = "fleetroll")]
#[command(author, version, about = "Manifest-driven application rollouts over ssh", long_about = None)]
struct Cli {
  /// Debug logging (RUST_LOG still wins when set)
  #[arg(short, long, global = true)]
  debug: bool,

  /// Log line format on stderr
  #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
  log_format: LogFormat,

  /// Result format on stdout
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Reconcile every host and roll out the changes
  Deploy(RunArgs),

  /// Show what a deploy would change, from cached snapshots only
  Plan(RunArgs),

  /// Show the run lock holder and the cached host snapshots
  Status(StatusArgs),
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  match run(cli) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<bool> {
  let logging = Logging {
    debug: cli.debug,
    format: cli.log_format,
  };
  match cli.command {
    Commands::Deploy(args) => cmd_deploy(&args, logging, cli.output),
    Commands::Plan(args) => cmd_plan(&args, logging, cli.output),
    Commands::Status(args) => {
      logging.init_console()?;
      cmd_status(&args, cli.output).map(|()| true)
    }
  }
}
