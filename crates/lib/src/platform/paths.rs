use std::path::PathBuf;

use thiserror::Error;

use crate::consts::{APP_NAME, HOME_ENV_VAR};

#[derive(Debug, Error)]
pub enum PathError {
  #[error("could not determine the home directory")]
  NoHomeDirectory,

  #[error("could not determine the data directory")]
  NoDataDirectory,

  #[error("cannot expand '{path}': {message}")]
  Expand { path: String, message: String },
}

/// Returns the user's home directory
pub fn home_dir() -> Result<PathBuf, PathError> {
  dirs::home_dir().ok_or(PathError::NoHomeDirectory)
}

/// Returns the directory for data files for the application
pub fn data_dir() -> Result<PathBuf, PathError> {
  dirs::data_dir()
    .map(|dir| dir.join(APP_NAME))
    .ok_or(PathError::NoDataDirectory)
}

/// Returns the scratch directory used for the repository checkout, staging and cached snapshots.
///
/// `FLEETROLL_HOME` wins over the platform data directory.
pub fn scratch_dir() -> Result<PathBuf, PathError> {
  match std::env::var(HOME_ENV_VAR) {
    Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
    _ => data_dir(),
  }
}

/// Expands a leading `~` and `$VAR` references in a user supplied path.
///
/// Referencing an unset variable is an error rather than an empty string.
pub fn expand_path(raw: &str) -> Result<PathBuf, PathError> {
  if raw.starts_with('~') {
    home_dir()?;
  }
  let expanded = shellexpand::full(raw).map_err(|e| PathError::Expand {
    path: raw.to_string(),
    message: e.to_string(),
  })?;
  Ok(PathBuf::from(expanded.as_ref()))
}
