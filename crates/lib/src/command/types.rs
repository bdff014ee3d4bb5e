use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::consts::DEFAULT_COMMAND_DELAY;
use crate::host::Host;

/// One `[section]` of the commands configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
  pub name: String,
  /// Command text template, rendered per host.
  pub cmd: String,
  /// Host classes allowed to run the command. Empty means every class.
  pub limit_to_hosts: Vec<String>,
  /// Host names that never run the command.
  pub exclude_hosts: Vec<String>,
  pub limit_sites: Vec<String>,
  pub limit_indexes: Vec<u32>,
  pub use_root: bool,
  pub use_app_binary: bool,
  /// Runs in the install phase before the bundle is unpacked.
  pub pre_install: bool,
  /// Only runs on a host's first install.
  pub only_run_on_init: bool,
  pub delay: Duration,
  /// `auth*` section supplying the postfix and hidden values.
  pub auth: Option<String>,
  pub suppress_limit_to_hosts_warnings: bool,
}

impl CommandSpec {
  pub fn new(name: &str, cmd: &str) -> Self {
    Self {
      name: name.to_string(),
      cmd: cmd.to_string(),
      limit_to_hosts: Vec::new(),
      exclude_hosts: Vec::new(),
      limit_sites: Vec::new(),
      limit_indexes: Vec::new(),
      use_root: false,
      use_app_binary: true,
      pre_install: false,
      only_run_on_init: false,
      delay: DEFAULT_COMMAND_DELAY,
      auth: None,
      suppress_limit_to_hosts_warnings: false,
    }
  }

  /// Whether `host` may run this command.
  pub fn eligibility(&self, host: &Host) -> Result<(), Ineligible> {
    if !self.limit_to_hosts.is_empty() && !self.limit_to_hosts.contains(&host.app_class) {
      return Err(Ineligible::Class);
    }
    if self.exclude_hosts.contains(&host.hostname) {
      return Err(Ineligible::Excluded);
    }
    if !self.limit_sites.is_empty() && !self.limit_sites.contains(&host.site) {
      return Err(Ineligible::Site);
    }
    if !self.limit_indexes.is_empty() && !self.limit_indexes.contains(&host.index) {
      return Err(Ineligible::Index);
    }
    if self.only_run_on_init && !host.first_install {
      return Err(Ineligible::NotFirstInstall);
    }
    Ok(())
  }
}

/// Why a host was refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
  Class,
  Excluded,
  Site,
  Index,
  NotFirstInstall,
}

impl Ineligible {
  /// Refusals that are expected and never worth a warning.
  pub fn is_quiet(self) -> bool {
    self == Ineligible::NotFirstInstall
  }
}

impl fmt::Display for Ineligible {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let reason = match self {
      Ineligible::Class => "host class not in limit_to_hosts",
      Ineligible::Excluded => "host listed in exclude_hosts",
      Ineligible::Site => "site not in limit_sites",
      Ineligible::Index => "index not in limit_indexes",
      Ineligible::NotFirstInstall => "only runs on first install",
    };
    f.write_str(reason)
  }
}

/// One `[auth*]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSpec {
  pub name: String,
  /// Appended to authenticated commands; may reference hidden values as `$NAME`.
  pub postfix: String,
  /// `(shell variable, value template)` pairs.
  pub hidden: Vec<(String, String)>,
}

/// A secret fed to the remote shell with `read -s`, never logged.
#[derive(Debug)]
pub struct HiddenValue {
  pub name: String,
  pub value: SecretString,
}

impl HiddenValue {
  pub fn new(name: &str, value: String) -> Self {
    Self {
      name: name.to_string(),
      value: SecretString::from(value),
    }
  }

  pub fn expose(&self) -> &str {
    self.value.expose_secret()
  }
}

/// A command rendered for one host, ready to execute.
#[derive(Debug)]
pub struct ResolvedCommand {
  pub spec: CommandSpec,
  /// Rendered command text without binary prefix, auth or sudo.
  pub cmd: String,
  pub postfix: Option<String>,
  pub hidden: Vec<HiddenValue>,
}

impl ResolvedCommand {
  pub fn name(&self) -> &str {
    &self.spec.name
  }

  /// Whether the command has to go through the interactive path.
  pub fn needs_interactive(&self) -> bool {
    !self.hidden.is_empty()
  }

  /// The full command line sent to the host.
  pub fn command_line(&self, app_binary: &str) -> String {
    let mut line = self.display_line(app_binary);
    if let Some(postfix) = self.postfix.as_deref().filter(|p| !p.is_empty()) {
      line = format!("{line} {postfix}");
    }
    if self.spec.use_root {
      line = format!("sudo {line}");
    }
    line
  }

  /// The command line as logged: no auth postfix, no sudo.
  pub fn display_line(&self, app_binary: &str) -> String {
    if self.spec.use_app_binary && !app_binary.is_empty() {
      format!("{app_binary} {}", self.cmd)
    } else {
      self.cmd.clone()
    }
  }
}
