use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How an application's files land on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
  /// The whole application directory is replaced under `<path>/<clean name>`.
  Copy,
  /// Files are copied directly into `<path>`, merging with what is there.
  CopyInPlace,
}

impl UpdateMode {
  pub fn as_str(self) -> &'static str {
    match self {
      UpdateMode::Copy => "copy",
      UpdateMode::CopyInPlace => "copy_in_place",
    }
  }
}

impl FromStr for UpdateMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "copy" => Ok(UpdateMode::Copy),
      "copy_in_place" => Ok(UpdateMode::CopyInPlace),
      other => Err(other.to_string()),
    }
  }
}

impl fmt::Display for UpdateMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The three command phases, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
  PreInstall,
  Install,
  PostInstall,
}

impl Phase {
  pub const ALL: [Phase; 3] = [Phase::PreInstall, Phase::Install, Phase::PostInstall];

  pub fn as_str(self) -> &'static str {
    match self {
      Phase::PreInstall => "pre-install",
      Phase::Install => "install",
      Phase::PostInstall => "post-install",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Command names per phase. Names refer to sections of the commands configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCommands {
  #[serde(default)]
  pub pre_install: Vec<String>,
  #[serde(default)]
  pub install: Vec<String>,
  #[serde(default)]
  pub post_install: Vec<String>,
}

impl PhaseCommands {
  pub fn get(&self, phase: Phase) -> &[String] {
    match phase {
      Phase::PreInstall => &self.pre_install,
      Phase::Install => &self.install,
      Phase::PostInstall => &self.post_install,
    }
  }

  pub fn get_mut(&mut self, phase: Phase) -> &mut Vec<String> {
    match phase {
      Phase::PreInstall => &mut self.pre_install,
      Phase::Install => &mut self.install,
      Phase::PostInstall => &mut self.post_install,
    }
  }

  pub fn is_empty(&self) -> bool {
    Phase::ALL.iter().all(|p| self.get(*p).is_empty())
  }

  /// Append `name` to `phase` unless it is already listed there.
  pub fn push_unique(&mut self, phase: Phase, name: &str) {
    let list = self.get_mut(phase);
    if !list.iter().any(|n| n == name) {
      list.push(name.to_string());
    }
  }
}

/// A named recipe for installing applications. Loaded once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMethod {
  pub name: String,
  /// Install location relative to the remote applications directory.
  pub path: String,
  pub update_method: UpdateMode,
  #[serde(default)]
  pub commands: PhaseCommands,
  #[serde(default)]
  pub delete_first: bool,
  #[serde(default)]
  pub all_sites: bool,
  #[serde(default)]
  pub restart: bool,
  #[serde(default)]
  pub skip_templating: bool,
  /// Regex patterns (`dir/file-regex` or `dir/`) moved out of the app before packaging.
  #[serde(default)]
  pub install_ignore: Vec<String>,
  /// Keys the loader does not interpret, kept for templating.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub extra: BTreeMap<String, String>,
}

impl DeploymentMethod {
  pub fn new(name: &str, path: &str, update_method: UpdateMode) -> Self {
    Self {
      name: name.to_string(),
      path: path.to_string(),
      update_method,
      commands: PhaseCommands::default(),
      delete_first: false,
      all_sites: false,
      restart: false,
      skip_templating: false,
      install_ignore: Vec::new(),
      extra: BTreeMap::new(),
    }
  }

  pub fn is_copy(&self) -> bool {
    self.update_method == UpdateMode::Copy
  }
}

/// Extra applications seeded onto brand new hosts of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupBootstrap {
  pub name: String,
  /// Host class that receives the bootstrap apps.
  pub ref_class: String,
  /// Class whose generated host name is used to select manifest rows.
  pub app_class: String,
  /// Method the bootstrapped apps are installed with.
  pub ref_method: String,
  /// Manifest method whose rows are bootstrapped.
  pub update_method: String,
}
