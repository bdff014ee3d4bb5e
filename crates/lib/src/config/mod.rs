//! INI-style configuration loading.
//!
//! Deployment methods, commands and the CLI settings file all share one small
//! dialect: `[section]` headers, `key = value` or `key: value` entries, `#`/`;`
//! comment lines, indented continuation lines and bare keys with no value.
//! Keys keep their case.

mod ini;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use ini::{IniDocument, IniSection, parse_bool, unquote};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("{path}:{line}: {message}")]
  Syntax { path: String, line: usize, message: String },

  #[error("[{section}] {key}: '{value}' is not a boolean")]
  InvalidBool {
    section: String,
    key: String,
    value: String,
  },
}

/// Read and parse a configuration file.
pub fn load_config(path: &Path) -> Result<IniDocument, ConfigError> {
  let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  IniDocument::parse_named(&text, &path.display().to_string())
}
