//! Fixtures for rollout tests: a checkout on disk and a fleet of fake hosts.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde_json::json;
use tempfile::TempDir;

use fleetroll_lib::app::{CommitLog, Track};
use fleetroll_lib::command::{CommandSet, HiddenValue};
use fleetroll_lib::config::IniDocument;
use fleetroll_lib::context::{RemoteLayout, RunContext, run_template_values};
use fleetroll_lib::host::{Host, HostNameFormat, build_registry};
use fleetroll_lib::manifest::Manifest;
use fleetroll_lib::method::DeploymentMethods;
use fleetroll_lib::orchestrate::{Rollout, RunMode, RunOptions, RunPaths, RunReport, SourceTree};
use fleetroll_lib::package::StagingLayout;
use fleetroll_lib::remote::{CommandOutput, RemoteError, RemoteShell, SshConfig};
use fleetroll_lib::repo::RepoError;
use fleetroll_lib::snapshot::SnapshotStore;

pub const REFNAME: &str = "main";
pub const APPS_DIR: &str = "/opt/app/etc";
pub const NAME_FORMAT: &str = "spl{class}{index:3}-{site}";

const METHODS: &str = r#"
[default]
app_name_filter = ^TA-

[search_head]
path = apps
update_method = copy
command_reload = reload

[indexer]
path = slave-apps
update_method = copy
"#;

const COMMANDS: &str = r#"
[reload]
cmd = reload
delay = 0

[restart]
cmd = restart
use_root = true
delay = 0
"#;

#[derive(Default)]
struct FleetState {
  commands: Vec<(String, String)>,
  uploads: BTreeMap<(String, String), Vec<u8>>,
  /// Installed list snapshot per host.
  installed: BTreeMap<String, String>,
  unreachable: BTreeSet<String>,
}

/// Hosts that unpack uploaded bundles and serve the snapshot file found inside.
#[derive(Clone, Default)]
pub struct FakeFleet {
  state: Arc<Mutex<FleetState>>,
}

impl FakeFleet {
  pub fn unreachable(&self, hostname: &str) {
    self.state.lock().unwrap().unreachable.insert(hostname.to_string());
  }

  pub fn commands_for(&self, hostname: &str) -> Vec<String> {
    let state = self.state.lock().unwrap();
    state
      .commands
      .iter()
      .filter(|(h, _)| h == hostname)
      .map(|(_, cmd)| cmd.clone())
      .collect()
  }

  pub fn installed(&self, hostname: &str) -> Option<String> {
    self.state.lock().unwrap().installed.get(hostname).cloned()
  }

  pub fn clear_commands(&self) {
    self.state.lock().unwrap().commands.clear();
  }

  fn unpack(&self, hostname: &str, command: &str) -> CommandOutput {
    let Some(name) = command.split_whitespace().skip_while(|w| *w != "-zxvf").nth(1) else {
      return CommandOutput::failure(2, "tar: no archive");
    };
    let mut state = self.state.lock().unwrap();
    let Some(bytes) = state.uploads.get(&(hostname.to_string(), name.to_string())) else {
      return CommandOutput::failure(2, format!("tar: {name}: Cannot open"));
    };

    let meta_suffix = format!("fleetroll/meta_{REFNAME}.json");
    let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
    let mut found = None;
    for entry in archive.entries().unwrap() {
      let mut entry = entry.unwrap();
      if entry.path().unwrap().to_string_lossy().ends_with(&meta_suffix) {
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        found = Some(text);
      }
    }
    if let Some(text) = found {
      state.installed.insert(hostname.to_string(), text);
    }
    CommandOutput::success("")
  }
}

#[async_trait]
impl RemoteShell for FakeFleet {
  async fn check(&self, host: &Host) -> Result<(), RemoteError> {
    if self.state.lock().unwrap().unreachable.contains(&host.hostname) {
      return Err(RemoteError::Authentication {
        host: host.hostname.clone(),
        message: "Permission denied (publickey)".into(),
      });
    }
    Ok(())
  }

  async fn exec(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError> {
    self.check(host).await?;
    {
      let mut state = self.state.lock().unwrap();
      state.commands.push((host.hostname.clone(), command.to_string()));
      if let Some(path) = command.strip_prefix("cat ") {
        let meta_file = format!("{APPS_DIR}/fleetroll/meta_{REFNAME}.json");
        return Ok(match state.installed.get(&host.hostname) {
          Some(text) if path == meta_file => CommandOutput::success(text.clone()),
          _ => CommandOutput::failure(1, format!("cat: {path}: No such file or directory")),
        });
      }
    }
    if command.contains("tar -zxvf") {
      return Ok(self.unpack(&host.hostname, command));
    }
    Ok(CommandOutput::success(""))
  }

  async fn exec_interactive(
    &self,
    host: &Host,
    command: &str,
    _hidden: &[HiddenValue],
  ) -> Result<CommandOutput, RemoteError> {
    self.exec(host, command).await
  }

  async fn upload(&self, host: &Host, local: &Path, remote_name: &str) -> Result<(), RemoteError> {
    self.check(host).await?;
    let bytes = fs::read(local).map_err(|e| RemoteError::Upload {
      host: host.hostname.clone(),
      file: local.display().to_string(),
      message: e.to_string(),
    })?;
    self
      .state
      .lock()
      .unwrap()
      .uploads
      .insert((host.hostname.clone(), remote_name.to_string()), bytes);
    Ok(())
  }
}

/// A checkout that never moves: every revision has the same content.
pub struct FixedCheckout {
  root: PathBuf,
  head: CommitLog,
  pub checkouts: Vec<Option<String>>,
}

impl SourceTree for FixedCheckout {
  fn root(&self) -> &Path {
    &self.root
  }

  fn checkout(&mut self, rev: Option<&str>) -> Result<(), RepoError> {
    self.checkouts.push(rev.map(str::to_string));
    Ok(())
  }

  fn commit_log(&self) -> Result<CommitLog, RepoError> {
    Ok(self.head.clone())
  }
}

/// Repository checkout, scratch directory and fake hosts shared by consecutive runs.
pub struct Fixture {
  _temp: TempDir,
  pub repo: PathBuf,
  pub scratch: PathBuf,
  pub fleet: FakeFleet,
  pub manifest: String,
  pub hosts: Vec<String>,
}

impl Fixture {
  pub fn new(hosts: &[&str]) -> Self {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let scratch = temp.path().join("scratch");
    fs::create_dir_all(repo.join("apps")).unwrap();
    fs::create_dir_all(&scratch).unwrap();
    Self {
      repo,
      scratch,
      fleet: FakeFleet::default(),
      manifest: "commit id,application,deployment method,whitelist,blacklist\n".to_string(),
      hosts: hosts.iter().map(|h| h.to_string()).collect(),
      _temp: temp,
    }
  }

  /// Add an application directory to the checkout.
  pub fn app(&self, name: &str) -> &Self {
    let dir = self.repo.join("apps").join(name).join("default");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("app.conf"), "[launcher]\nversion = 1.0\n").unwrap();
    self
  }

  pub fn set_manifest(&mut self, rows: &[&str]) {
    self.manifest = "commit id,application,deployment method,whitelist,blacklist\n".to_string();
    for row in rows {
      self.manifest.push_str(row);
      self.manifest.push('\n');
    }
  }

  pub fn options(&self, mode: RunMode) -> RunOptions {
    RunOptions {
      mode,
      refname: REFNAME.to_string(),
      scratch_dir: self.scratch.clone(),
      repo_url: "file:///unused".to_string(),
      repo_branch: "main".to_string(),
      apps_folder: "apps".to_string(),
      manifest_name: "manifest.csv".to_string(),
      commands_file: None,
      hosts: self.hosts.clone(),
      host_classes: vec!["sh".to_string(), "idx".to_string()],
      name_format: NAME_FORMAT.to_string(),
      boot_order: Vec::new(),
      site_override: false,
      num_connections: 4,
      strict_commit_ids: false,
      firstrun: false,
      dry_run: false,
      clean: false,
      clean_repo: false,
      clean_metas: false,
      skip_repo_sync: true,
      templating: false,
      template_values: json!({}),
      install_ignore: Vec::new(),
      remote_apps_dir: APPS_DIR.to_string(),
      app_binary: "bin/app".to_string(),
      ssh: SshConfig::default(),
      logging_path: None,
    }
  }

  pub fn snapshots(&self) -> SnapshotStore {
    let paths = RunPaths::new(&self.scratch, REFNAME);
    SnapshotStore::new(paths.meta, &format!("meta_{REFNAME}"))
  }

  /// Build a rollout the way `run` does, minus the repository sync.
  pub async fn run(&self, options: RunOptions) -> RunReport {
    let paths = RunPaths::new(&options.scratch_dir, &options.refname);
    let methods = DeploymentMethods::from_ini(&IniDocument::parse(METHODS).unwrap()).unwrap();
    let commands = CommandSet::from_ini(&IniDocument::parse(COMMANDS).unwrap()).unwrap();
    commands.validate_methods(&methods).unwrap();
    let manifest = Manifest::parse(&self.manifest).unwrap();
    let format: HostNameFormat = options.name_format.parse().unwrap();
    let snapshots = self.snapshots();
    let registry = build_registry(&options.hosts, &options.host_classes, &format, |h| snapshots.path_for(h)).unwrap();

    let ctx = RunContext {
      shell: self.fleet.clone(),
      commands,
      layout: RemoteLayout::new(&options.remote_apps_dir, &options.app_binary, &options.meta_name()),
      template_values: run_template_values(&options.template_values, &registry),
      tars_dir: StagingLayout::new(&paths.tmp).tars_dir().to_path_buf(),
      snapshots,
      dry_run: options.dry_run,
    };
    let rollout = Rollout {
      ctx: Arc::new(ctx),
      registry,
      manifest,
      methods,
      format,
      track: Track::new(),
      options,
      paths,
    };

    let mut tree = FixedCheckout {
      root: self.repo.clone(),
      head: CommitLog {
        commit_id: "f00dfeed".repeat(5),
        abbrev_commit_id: "f00dfee".to_string(),
        author_name: "Release Bot".to_string(),
        author_email: "release@example.com".to_string(),
        subject: "bump apps".to_string(),
      },
      checkouts: Vec::new(),
    };
    rollout.execute(&mut tree).await.unwrap()
  }
}

/// Names of the applications recorded in a snapshot file.
pub fn snapshot_apps(text: &str) -> Vec<String> {
  let value: serde_json::Value = serde_json::from_str(text).unwrap();
  let mut names: Vec<String> = value["content"]
    .as_array()
    .unwrap()
    .iter()
    .map(|a| a["name"].as_str().unwrap().to_string())
    .collect();
  names.sort();
  names
}

pub fn read(path: &Path) -> String {
  let mut text = String::new();
  File::open(path).unwrap().read_to_string(&mut text).unwrap();
  text
}
