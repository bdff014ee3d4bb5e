//! Remote commands referenced by deployment methods.
//!
//! Loaded from `commands.conf`. Each section names one command; `auth*`
//! sections hold a postfix and hidden values for authenticated commands:
//!
//! ```text
//! [restart]                       mandatory
//! cmd = restart
//! use_root = true
//!
//! [reload_deploy]
//! cmd = reload deploy-server -class {{ app_class }}
//! limit_to_hosts = ["ds"]
//! use_auth = true
//! delay = 5
//!
//! [auth]
//! postfix = -auth "$ADMIN_USER:$ADMIN_PASS"
//! ADMIN_USER = {{ creds.user }}
//! ADMIN_PASS = {{ creds.password }}
//! ```

mod types;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::{ConfigError, IniDocument, IniSection, load_config};
use crate::consts::{DEFAULT_AUTH_SECTION, RESTART_COMMAND};
use crate::method::DeploymentMethods;
use crate::template::{self, TemplateError};

pub use types::{AuthSpec, CommandSpec, HiddenValue, Ineligible, ResolvedCommand};

const AUTH_PREFIX: &str = "auth";

/// Shell redirection and chaining tokens that hint at injected commands.
const SUSPICIOUS_TOKENS: [&str; 12] = ["&&", "&", ">", "1>", "2>", ">>", "1>>", "2>>", "<", "&>", "|", "||"];

#[derive(Debug, Error)]
pub enum CommandConfigError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("commands configuration has no '[{0}]' section")]
  MissingCommand(String),

  #[error("command '{0}' has no cmd")]
  MissingCmd(String),

  #[error("[{section}] {key}: {message}")]
  InvalidValue {
    section: String,
    key: String,
    message: String,
  },

  #[error("command '{command}' uses unknown auth section '{auth}'")]
  UnknownAuth { command: String, auth: String },

  #[error("deployment method '{method}' references unknown command '{command}'")]
  UnknownCommand { method: String, command: String },

  #[error("failed to render command '{command}': {source}")]
  Render {
    command: String,
    #[source]
    source: TemplateError,
  },
}

/// All commands and auth sections of a run.
#[derive(Debug, Clone, Default)]
pub struct CommandSet {
  commands: BTreeMap<String, CommandSpec>,
  auth: BTreeMap<String, AuthSpec>,
}

impl CommandSet {
  pub fn load(path: &Path) -> Result<Self, CommandConfigError> {
    let doc = load_config(path)?;
    Self::from_ini(&doc)
  }

  pub fn from_ini(doc: &IniDocument) -> Result<Self, CommandConfigError> {
    let mut set = CommandSet::default();

    for section in doc.sections() {
      if section.name().starts_with(AUTH_PREFIX) {
        let auth = parse_auth(section)?;
        set.auth.insert(auth.name.clone(), auth);
      } else {
        let command = parse_command(section)?;
        set.commands.insert(command.name.clone(), command);
      }
    }

    if !set.commands.contains_key(RESTART_COMMAND) {
      return Err(CommandConfigError::MissingCommand(RESTART_COMMAND.to_string()));
    }
    for command in set.commands.values() {
      if let Some(auth) = &command.auth
        && !set.auth.contains_key(auth)
      {
        return Err(CommandConfigError::UnknownAuth {
          command: command.name.clone(),
          auth: auth.clone(),
        });
      }
    }

    Ok(set)
  }

  pub fn insert(&mut self, command: CommandSpec) {
    self.commands.insert(command.name.clone(), command);
  }

  pub fn insert_auth(&mut self, auth: AuthSpec) {
    self.auth.insert(auth.name.clone(), auth);
  }

  pub fn get(&self, name: &str) -> Option<&CommandSpec> {
    self.commands.get(name)
  }

  pub fn len(&self) -> usize {
    self.commands.len()
  }

  pub fn is_empty(&self) -> bool {
    self.commands.is_empty()
  }

  /// Every command name a deployment method lists must exist.
  pub fn validate_methods(&self, methods: &DeploymentMethods) -> Result<(), CommandConfigError> {
    for method in methods.iter() {
      for phase in crate::method::Phase::ALL {
        for name in method.commands.get(phase) {
          if !self.commands.contains_key(name) {
            return Err(CommandConfigError::UnknownCommand {
              method: method.name.clone(),
              command: name.clone(),
            });
          }
        }
      }
    }
    Ok(())
  }

  /// Render the named commands for one host. Duplicate names keep their first position.
  pub fn resolve(&self, names: &[String], bindings: &Value) -> Result<Vec<ResolvedCommand>, CommandConfigError> {
    let mut seen: Vec<&str> = Vec::new();
    let mut resolved = Vec::new();

    for name in names {
      if seen.contains(&name.as_str()) {
        continue;
      }
      seen.push(name);

      let spec = self
        .commands
        .get(name)
        .ok_or_else(|| CommandConfigError::MissingCommand(name.clone()))?;
      resolved.push(self.resolve_one(spec, bindings)?);
    }

    Ok(resolved)
  }

  fn resolve_one(&self, spec: &CommandSpec, bindings: &Value) -> Result<ResolvedCommand, CommandConfigError> {
    let render = |text: &str| {
      template::render(text, bindings).map_err(|source| CommandConfigError::Render {
        command: spec.name.clone(),
        source,
      })
    };

    let cmd = render(&spec.cmd)?;
    if contains_suspicious_token(&cmd) {
      warn!(command = %spec.name, cmd = %cmd, "command contains shell redirection or chaining");
    }

    let (postfix, hidden) = match spec.auth.as_ref().and_then(|a| self.auth.get(a)) {
      Some(auth) => {
        let postfix = render(&auth.postfix)?;
        let mut hidden = Vec::with_capacity(auth.hidden.len());
        for (name, value) in &auth.hidden {
          hidden.push(HiddenValue::new(name, render(value)?));
        }
        (Some(postfix), hidden)
      }
      None => (None, Vec::new()),
    };

    Ok(ResolvedCommand {
      spec: spec.clone(),
      cmd,
      postfix,
      hidden,
    })
  }
}

/// Whether any whitespace-separated word of `cmd` is a shell redirection or chaining token.
pub fn contains_suspicious_token(cmd: &str) -> bool {
  cmd.split_whitespace().any(|word| SUSPICIOUS_TOKENS.contains(&word))
}

fn invalid(section: &IniSection, key: &str, message: impl Into<String>) -> CommandConfigError {
  CommandConfigError::InvalidValue {
    section: section.name().to_string(),
    key: key.to_string(),
    message: message.into(),
  }
}

fn json_list<T: DeserializeOwned>(section: &IniSection, key: &str) -> Result<Vec<T>, CommandConfigError> {
  match section.get_unquoted(key) {
    None | Some("") => Ok(Vec::new()),
    Some(raw) => serde_json::from_str(raw).map_err(|e| invalid(section, key, format!("expected a JSON array: {e}"))),
  }
}

fn flag(section: &IniSection, key: &str, default: bool) -> Result<bool, CommandConfigError> {
  Ok(section.get_bool(key)?.unwrap_or(default))
}

fn parse_command(section: &IniSection) -> Result<CommandSpec, CommandConfigError> {
  let name = section.name();
  let cmd = section
    .get_unquoted("cmd")
    .filter(|c| !c.is_empty())
    .ok_or_else(|| CommandConfigError::MissingCmd(name.to_string()))?;

  let mut spec = CommandSpec::new(name, cmd);
  spec.limit_to_hosts = json_list(section, "limit_to_hosts")?;
  spec.exclude_hosts = json_list(section, "exclude_hosts")?;
  spec.limit_sites = json_list(section, "limit_sites")?;
  spec.limit_indexes = json_list(section, "limit_indexes")?;
  spec.use_root = flag(section, "use_root", false)?;
  spec.use_app_binary = flag(section, "use_app_binary", true)?;
  spec.pre_install = flag(section, "pre_install", false)?;
  spec.only_run_on_init = flag(section, "only_run_on_init", false)?;
  spec.suppress_limit_to_hosts_warnings = flag(section, "suppress_limit_to_hosts_warnings", false)?;

  if let Some(raw) = section.get_unquoted("delay") {
    let secs: u64 = raw
      .trim()
      .parse()
      .map_err(|_| invalid(section, "delay", "expected whole seconds"))?;
    spec.delay = Duration::from_secs(secs);
  }

  spec.auth = match section.get_unquoted("auth").filter(|a| !a.is_empty()) {
    Some(auth) => Some(auth.to_string()),
    None if flag(section, "use_auth", false)? => Some(DEFAULT_AUTH_SECTION.to_string()),
    None => None,
  };

  Ok(spec)
}

fn parse_auth(section: &IniSection) -> Result<AuthSpec, CommandConfigError> {
  // hidden values become shell variables on the remote side
  let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| invalid(section, "", e.to_string()))?;

  let mut auth = AuthSpec {
    name: section.name().to_string(),
    postfix: String::new(),
    hidden: Vec::new(),
  };
  for (key, raw) in section.entries() {
    let value = raw.map(crate::config::unquote).unwrap_or_default();
    if key == "postfix" {
      auth.postfix = value.to_string();
    } else if identifier.is_match(key) {
      auth.hidden.push((key.to_string(), value.to_string()));
    } else {
      return Err(invalid(section, key, "hidden value names must be shell identifiers"));
    }
  }
  Ok(auth)
}
