//! Deployment methods.
//!
//! Loaded from `configs/deploymentmethods.conf` in the repository:
//!
//! ```text
//! [default]                      name filter + inclusion file name
//! app_name_filter = ^(TA-|SA-)
//! install_inclusion_file = .inclusions
//!
//! [search_head]                  one section per method
//! path = etc/apps
//! update_method = copy
//! pre_script = stop_forwarder    scripts before any command: pre-install
//! command_1 = reload             commands: install
//! post_script = notify           scripts after a command: post-install
//!
//! [StartupBootstrap_indexer]     first-run seeding
//! ref_class = idx
//! app_class = sh
//! ref_method = indexer_bootstrap
//! update_method = search_head
//! ```

mod types;

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, IniDocument, IniSection, load_config};

pub use types::{DeploymentMethod, Phase, PhaseCommands, StartupBootstrap, UpdateMode};

const DEFAULT_SECTION: &str = "default";
const BOOTSTRAP_PREFIX: &str = "StartupBootstrap_";
const MANDATORY_KEYS: [&str; 2] = ["path", "update_method"];
const BOOL_KEYS: [&str; 4] = ["delete_first", "all_sites", "restart", "skip_templating"];

#[derive(Debug, Error)]
pub enum MethodError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("deployment method '{method}' is missing mandatory key '{key}'")]
  MissingKey { method: String, key: String },

  #[error("deployment method '{method}' uses unknown update method '{value}'")]
  UnknownUpdateMethod { method: String, value: String },

  #[error("startup bootstrap '{section}' is missing key '{key}'")]
  IncompleteBootstrap { section: String, key: String },

  #[error("invalid app_name_filter '{pattern}': {source}")]
  InvalidNameFilter {
    pattern: String,
    #[source]
    source: regex::Error,
  },
}

/// Every deployment method of a run plus the `default` section settings.
#[derive(Debug, Clone, Default)]
pub struct DeploymentMethods {
  methods: BTreeMap<String, DeploymentMethod>,
  name_filter: Option<Regex>,
  inclusion_file: Option<String>,
  bootstrap: Vec<StartupBootstrap>,
}

impl DeploymentMethods {
  pub fn load(path: &Path) -> Result<Self, MethodError> {
    let doc = load_config(path)?;
    Self::from_ini(&doc)
  }

  pub fn from_ini(doc: &IniDocument) -> Result<Self, MethodError> {
    let mut methods = DeploymentMethods::default();

    for section in doc.sections() {
      let name = section.name();
      if name.eq_ignore_ascii_case(DEFAULT_SECTION) {
        methods.load_defaults(section)?;
      } else if name.starts_with(BOOTSTRAP_PREFIX) {
        methods.bootstrap.push(parse_bootstrap(section)?);
      } else {
        let method = parse_method(section)?;
        debug!(method = %method.name, path = %method.path, mode = %method.update_method, "loaded deployment method");
        methods.methods.insert(method.name.clone(), method);
      }
    }

    Ok(methods)
  }

  fn load_defaults(&mut self, section: &IniSection) -> Result<(), MethodError> {
    if let Some(pattern) = section.get_unquoted("app_name_filter")
      && !pattern.is_empty()
    {
      let regex = Regex::new(pattern).map_err(|source| MethodError::InvalidNameFilter {
        pattern: pattern.to_string(),
        source,
      })?;
      self.name_filter = Some(regex);
    }
    self.inclusion_file = section
      .get_unquoted("install_inclusion_file")
      .filter(|f| !f.is_empty())
      .map(str::to_string);
    Ok(())
  }

  pub fn insert(&mut self, method: DeploymentMethod) {
    self.methods.insert(method.name.clone(), method);
  }

  pub fn get(&self, name: &str) -> Option<&DeploymentMethod> {
    self.methods.get(name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &DeploymentMethod> {
    self.methods.values()
  }

  pub fn len(&self) -> usize {
    self.methods.len()
  }

  pub fn is_empty(&self) -> bool {
    self.methods.is_empty()
  }

  /// Display/path-safe application name: the name filter pattern removed.
  pub fn clean_name(&self, app_name: &str) -> String {
    match &self.name_filter {
      Some(filter) => filter.replace_all(app_name, "").into_owned(),
      None => app_name.to_string(),
    }
  }

  /// Per-app file listing paths to restore from the ignore list.
  pub fn inclusion_file(&self) -> Option<&str> {
    self.inclusion_file.as_deref()
  }

  pub fn bootstrap(&self) -> &[StartupBootstrap] {
    &self.bootstrap
  }
}

fn parse_method(section: &IniSection) -> Result<DeploymentMethod, MethodError> {
  let name = section.name();
  for key in MANDATORY_KEYS {
    if section.get(key).is_none() {
      return Err(MethodError::MissingKey {
        method: name.to_string(),
        key: key.to_string(),
      });
    }
  }

  let raw_mode = section.get_unquoted("update_method").unwrap_or_default();
  let update_method = raw_mode
    .parse::<UpdateMode>()
    .map_err(|value| MethodError::UnknownUpdateMethod {
      method: name.to_string(),
      value,
    })?;
  let path = section.get_unquoted("path").unwrap_or_default();

  let mut method = DeploymentMethod::new(name, path, update_method);

  for (key, raw) in section.entries() {
    if MANDATORY_KEYS.contains(&key) {
      continue;
    }
    if BOOL_KEYS.contains(&key) {
      let value = section.get_bool(key)?.unwrap_or(false);
      match key {
        "delete_first" => method.delete_first = value,
        "all_sites" => method.all_sites = value,
        "restart" => method.restart = value,
        _ => method.skip_templating = value,
      }
      continue;
    }

    let value = raw.map(crate::config::unquote).unwrap_or_default();
    if key.contains("command") {
      method.commands.install.push(value.to_string());
    } else if key.contains("script") {
      // scripts listed before any command run first, the rest run last
      if method.commands.install.is_empty() {
        method.commands.pre_install.push(value.to_string());
      } else {
        method.commands.post_install.push(value.to_string());
      }
    } else if key.contains("install_ignore") {
      method.install_ignore = value
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    } else {
      method.extra.insert(key.to_string(), value.to_string());
    }
  }

  Ok(method)
}

fn parse_bootstrap(section: &IniSection) -> Result<StartupBootstrap, MethodError> {
  let require = |key: &str| {
    section
      .get_unquoted(key)
      .map(str::to_string)
      .ok_or_else(|| MethodError::IncompleteBootstrap {
        section: section.name().to_string(),
        key: key.to_string(),
      })
  };

  Ok(StartupBootstrap {
    name: section.name().to_string(),
    ref_class: require("ref_class")?,
    app_class: require("app_class")?,
    ref_method: require("ref_method")?,
    update_method: require("update_method")?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const CONF: &str = r#"
[default]
app_name_filter = ^(TA-|SA-)
install_inclusion_file = .inclusions

[search_head]
path = etc/apps
update_method = copy
pre_script = stop_forwarder
command_reload = reload
command_restart = restart
post_script = notify
restart = true
install_ignore = local;lookups/.*\.csv
owner = splunk

[in_place]
path = etc/system/local
update_method = copy_in_place
delete_first = yes

[StartupBootstrap_idx]
ref_class = idx
app_class = sh
ref_method = in_place
update_method = search_head
"#;

  fn load() -> DeploymentMethods {
    DeploymentMethods::from_ini(&IniDocument::parse(CONF).unwrap()).unwrap()
  }

  #[test]
  fn scripts_split_around_commands() {
    let methods = load();
    let sh = methods.get("search_head").unwrap();
    assert_eq!(sh.commands.pre_install, ["stop_forwarder"]);
    assert_eq!(sh.commands.install, ["reload", "restart"]);
    assert_eq!(sh.commands.post_install, ["notify"]);
  }

  #[test]
  fn flags_ignore_list_and_extra_keys() {
    let methods = load();
    let sh = methods.get("search_head").unwrap();
    assert!(sh.restart);
    assert!(!sh.delete_first);
    assert_eq!(sh.install_ignore, ["local", r"lookups/.*\.csv"]);
    assert_eq!(sh.extra.get("owner").map(String::as_str), Some("splunk"));

    let in_place = methods.get("in_place").unwrap();
    assert_eq!(in_place.update_method, UpdateMode::CopyInPlace);
    assert!(in_place.delete_first);
    assert!(in_place.commands.is_empty());
  }

  #[test]
  fn defaults_and_bootstrap_are_not_methods() {
    let methods = load();
    assert_eq!(methods.len(), 2);
    assert_eq!(methods.clean_name("TA-nix"), "nix");
    assert_eq!(methods.clean_name("search_app"), "search_app");
    assert_eq!(methods.inclusion_file(), Some(".inclusions"));

    let bootstrap = &methods.bootstrap()[0];
    assert_eq!(bootstrap.ref_class, "idx");
    assert_eq!(bootstrap.ref_method, "in_place");
  }

  #[test]
  fn missing_mandatory_key_is_fatal() {
    let doc = IniDocument::parse("[broken]\npath = etc/apps\n").unwrap();
    let err = DeploymentMethods::from_ini(&doc).unwrap_err();
    assert!(matches!(err, MethodError::MissingKey { ref key, .. } if key == "update_method"));
  }

  #[test]
  fn unknown_update_method_is_fatal() {
    let doc = IniDocument::parse("[broken]\npath = a\nupdate_method = rsync\n").unwrap();
    let err = DeploymentMethods::from_ini(&doc).unwrap_err();
    assert!(matches!(err, MethodError::UnknownUpdateMethod { ref value, .. } if value == "rsync"));
  }
}
