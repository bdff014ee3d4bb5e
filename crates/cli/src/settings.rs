//! Run settings: command-line flags over the optional `[fleetroll]` INI file.
//!
//! File keys mirror the long flag names (`repo-url`, or `repo_url`). A flag
//! given on the command line always wins; list values in the file are
//! whitespace separated.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::Value;

use fleetroll_lib::config::{IniSection, load_config, parse_bool};
use fleetroll_lib::consts::{APP_NAME, DEFAULT_NUM_CONNECTIONS};
use fleetroll_lib::orchestrate::{RunMode, RunOptions};
use fleetroll_lib::platform::paths::{expand_path, scratch_dir};
use fleetroll_lib::remote::SshConfig;
use fleetroll_lib::template;

const DEFAULT_REFNAME: &str = "repo";
const DEFAULT_BRANCH: &str = "master";
const DEFAULT_APPS_FOLDER: &str = "base_apps";
const DEFAULT_MANIFEST: &str = "manifest_baseapps.csv";
const DEFAULT_NAME_FORMAT: &str = "spl{class}{index:3}-{site}test";
const DEFAULT_SSH_USER: &str = "ssh_user";
const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
  /// INI file with defaults for any flag, in a [fleetroll] section
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// Hosts to update (name[.domain][:address]); defaults to one per class
  #[arg(long, num_args = 1.., value_name = "HOST")]
  pub hosts: Vec<String>,

  /// Host classes known to the naming format
  #[arg(long, num_args = 1.., value_name = "CLASS")]
  pub host_classes: Vec<String>,

  /// Class groups in update order, e.g. "idx,cm sh"
  #[arg(long, num_args = 1.., value_name = "GROUPS")]
  pub boot_order: Vec<String>,

  /// Update every site of a boot group at once
  #[arg(long)]
  pub site_override: bool,

  /// Hosts updated concurrently
  #[arg(long, value_name = "N")]
  pub num_connections: Option<usize>,

  /// Reject manifest rows without a commit id (default)
  #[arg(long, overrides_with = "no_strict_commit_ids")]
  pub strict_commit_ids: bool,

  /// Use the repository head for manifest rows without a commit id
  #[arg(long)]
  pub no_strict_commit_ids: bool,

  /// Seed first-run bootstrap applications on hosts without a snapshot
  #[arg(long)]
  pub firstrun: bool,

  /// Log remote operations instead of running them
  #[arg(long)]
  pub dry_run: bool,

  /// Remove the scratch directory before the run
  #[arg(long)]
  pub clean: bool,

  /// Remove the repository checkout, forcing a fresh clone
  #[arg(long)]
  pub clean_repo: bool,

  /// Remove cached snapshots, forcing a fetch from every host
  #[arg(long)]
  pub clean_metas: bool,

  /// Run even when the manifest did not change
  #[arg(long)]
  pub skip_repo_sync: bool,

  /// Template application files, not only commands
  #[arg(long)]
  pub templating: bool,

  /// JSON or YAML files with template values
  #[arg(long, num_args = 1.., value_name = "FILE")]
  pub template_files: Vec<PathBuf>,

  /// Template values as a JSON object, applied over the files
  #[arg(long, value_name = "JSON")]
  pub template_json: Option<String>,

  /// Patterns removed from every application, separated by ';'
  #[arg(long, value_name = "PATTERNS")]
  pub install_ignore: Option<String>,

  /// Commands configuration; defaults to configs/commands.conf in the repository
  #[arg(long, value_name = "FILE")]
  pub commands_file: Option<PathBuf>,

  #[arg(long, value_name = "URL")]
  pub repo_url: Option<String>,

  #[arg(long, value_name = "BRANCH")]
  pub repo_branch: Option<String>,

  /// Name of this rollout; keys the checkout and snapshot files
  #[arg(long, value_name = "NAME")]
  pub ref_name: Option<String>,

  /// Where the checkout, staging area and cached snapshots live
  #[arg(long, value_name = "DIR")]
  pub scratch_dir: Option<PathBuf>,

  /// Application sources inside the repository
  #[arg(long, value_name = "DIR")]
  pub apps_folder: Option<String>,

  /// Manifest file inside the repository's configs directory
  #[arg(long, value_name = "FILE")]
  pub apps_manifest: Option<String>,

  /// Host name format, e.g. "spl{class}{index:3}-{site}test"
  #[arg(long, value_name = "FORMAT")]
  pub name_format: Option<String>,

  /// Applications directory on the hosts
  #[arg(long, value_name = "DIR")]
  pub app_folder: Option<String>,

  /// Binary commands run through, relative to the applications directory
  #[arg(long, value_name = "PATH")]
  pub app_binary: Option<String>,

  #[arg(long, value_name = "USER")]
  pub ssh_user: Option<String>,

  #[arg(long, value_name = "FILE")]
  pub ssh_keyfile: Option<PathBuf>,

  #[arg(long, value_name = "PORT")]
  pub ssh_port: Option<u16>,

  /// Directory for the run and event logs; defaults to <scratch-dir>/logs
  #[arg(long, value_name = "DIR")]
  pub logging_path: Option<PathBuf>,

  /// Write no log files
  #[arg(long)]
  pub disable_logging: bool,
}

/// The `[fleetroll]` section of the settings file, if any.
#[derive(Debug, Default)]
struct FileDefaults {
  section: Option<IniSection>,
}

impl FileDefaults {
  fn load(path: Option<&Path>) -> Result<Self> {
    let Some(path) = path else {
      return Ok(Self::default());
    };
    let path = dunce::canonicalize(path).with_context(|| format!("Settings file not found: {}", path.display()))?;
    let doc = load_config(&path).with_context(|| format!("Failed to load settings: {}", path.display()))?;
    Ok(Self {
      section: doc.section(APP_NAME).cloned(),
    })
  }

  fn raw(&self, key: &str) -> Option<&str> {
    let section = self.section.as_ref()?;
    section
      .get_unquoted(key)
      .or_else(|| section.get_unquoted(&key.replace('-', "_")))
      .map(str::trim)
      .filter(|v| !v.is_empty())
  }

  fn string(&self, key: &str) -> Option<String> {
    self.raw(key).map(str::to_string)
  }

  fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
    match self.raw(key) {
      Some(raw) => match raw.parse() {
        Ok(value) => Ok(Some(value)),
        Err(_) => bail!("settings: '{raw}' is not a valid value for {key}"),
      },
      None => Ok(None),
    }
  }

  fn flag(&self, key: &str) -> Result<Option<bool>> {
    match self.raw(key) {
      Some(raw) => match parse_bool(raw) {
        Some(value) => Ok(Some(value)),
        None => bail!("settings: '{raw}' is not a boolean for {key}"),
      },
      None => Ok(None),
    }
  }

  fn list(&self, key: &str) -> Vec<String> {
    self
      .raw(key)
      .map(|v| v.split_whitespace().map(str::to_string).collect())
      .unwrap_or_default()
  }
}

fn or_list(given: &[String], file: Vec<String>) -> Vec<String> {
  if given.is_empty() { file } else { given.to_vec() }
}

impl RunArgs {
  /// Merge flags with the settings file into the options of one run.
  pub fn resolve(&self, mode: RunMode) -> Result<RunOptions> {
    let file = FileDefaults::load(self.config.as_deref())?;
    let switch = |given: bool, key: &str| -> Result<bool> { Ok(given || file.flag(key)?.unwrap_or(false)) };

    let strict_commit_ids = if self.no_strict_commit_ids {
      false
    } else if self.strict_commit_ids {
      true
    } else {
      match file.flag("no-strict-commit-ids")? {
        Some(relaxed) => !relaxed,
        None => file.flag("strict-commit-ids")?.unwrap_or(true),
      }
    };

    let template_files: Vec<PathBuf> = if self.template_files.is_empty() {
      file
        .list("template-files")
        .iter()
        .map(|p| expand_path(p))
        .collect::<Result<_, _>>()
        .context("settings: template-files")?
    } else {
      self.template_files.clone()
    };
    let template_json = self.template_json.clone().or_else(|| file.string("template-json"));
    let template_values = load_template_values(&template_files, template_json.as_deref())?;

    let install_ignore = self
      .install_ignore
      .clone()
      .or_else(|| file.string("install-ignore"))
      .map(|raw| {
        raw
          .split(';')
          .map(str::trim)
          .filter(|p| !p.is_empty())
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default();

    let path_setting = |given: &Option<PathBuf>, key: &str| -> Result<Option<PathBuf>> {
      if given.is_some() {
        return Ok(given.clone());
      }
      file
        .raw(key)
        .map(expand_path)
        .transpose()
        .with_context(|| format!("settings: {key}"))
    };

    let scratch = match path_setting(&self.scratch_dir, "scratch-dir")? {
      Some(dir) => dir,
      None => scratch_dir().context("Failed to determine the scratch directory")?,
    };
    let logging_path = if switch(self.disable_logging, "disable-logging")? {
      None
    } else {
      Some(path_setting(&self.logging_path, "logging-path")?.unwrap_or_else(|| scratch.join(LOGS_DIR)))
    };

    let ssh = SshConfig {
      user: self
        .ssh_user
        .clone()
        .or_else(|| file.string("ssh-user"))
        .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
      key_file: path_setting(&self.ssh_keyfile, "ssh-keyfile")?,
      port: match self.ssh_port {
        Some(port) => port,
        None => file.parsed("ssh-port")?.unwrap_or(22),
      },
      ..SshConfig::default()
    };

    Ok(RunOptions {
      mode,
      refname: self
        .ref_name
        .clone()
        .or_else(|| file.string("ref-name"))
        .unwrap_or_else(|| DEFAULT_REFNAME.to_string()),
      scratch_dir: scratch,
      repo_url: self.repo_url.clone().or_else(|| file.string("repo-url")).unwrap_or_default(),
      repo_branch: self
        .repo_branch
        .clone()
        .or_else(|| file.string("repo-branch"))
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
      apps_folder: self
        .apps_folder
        .clone()
        .or_else(|| file.string("apps-folder"))
        .unwrap_or_else(|| DEFAULT_APPS_FOLDER.to_string()),
      manifest_name: self
        .apps_manifest
        .clone()
        .or_else(|| file.string("apps-manifest"))
        .unwrap_or_else(|| DEFAULT_MANIFEST.to_string()),
      commands_file: path_setting(&self.commands_file, "commands-file")?,
      hosts: or_list(&self.hosts, file.list("hosts")),
      host_classes: or_list(&self.host_classes, file.list("host-classes")),
      name_format: self
        .name_format
        .clone()
        .or_else(|| file.string("name-format"))
        .unwrap_or_else(|| DEFAULT_NAME_FORMAT.to_string()),
      boot_order: or_list(&self.boot_order, file.list("boot-order")),
      site_override: switch(self.site_override, "site-override")?,
      num_connections: match self.num_connections {
        Some(n) => n,
        None => file.parsed("num-connections")?.unwrap_or(DEFAULT_NUM_CONNECTIONS),
      }
      .max(1),
      strict_commit_ids,
      firstrun: switch(self.firstrun, "firstrun")?,
      dry_run: switch(self.dry_run, "dry-run")?,
      clean: switch(self.clean, "clean")?,
      clean_repo: switch(self.clean_repo, "clean-repo")?,
      clean_metas: switch(self.clean_metas, "clean-metas")?,
      skip_repo_sync: switch(self.skip_repo_sync, "skip-repo-sync")?,
      templating: switch(self.templating, "templating")?,
      template_values,
      install_ignore,
      remote_apps_dir: self.app_folder.clone().or_else(|| file.string("app-folder")).unwrap_or_default(),
      app_binary: self.app_binary.clone().or_else(|| file.string("app-binary")).unwrap_or_default(),
      ssh,
      logging_path,
    })
  }
}

/// Value files merged in order, then the inline JSON object on top.
fn load_template_values(files: &[PathBuf], inline: Option<&str>) -> Result<Value> {
  let from_files = template::load_value_files(files).context("Failed to load template values")?;
  let Some(inline) = inline else {
    return Ok(from_files);
  };
  let inline: Value = serde_json::from_str(inline).context("--template-json is not valid JSON")?;
  if !inline.is_object() {
    bail!("--template-json must be a JSON object");
  }
  Ok(template::merge(&[&from_files, &inline]))
}
