//! The application manifest and its assignment to hosts.
//!
//! The manifest is a CSV file with one row per application:
//!
//! ```text
//! commit id,application,deployment method,whitelist,blacklist
//! 3f2a9c1,TA-nix,search_head,"^splsh,^splidx",splsh005
//! ```
//!
//! Header names are matched case-insensitively, ignoring `-`, `_` and spaces.
//! Whitelist and blacklist cells are comma-separated host name regexes.

mod assign;
mod csv;

use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::debug;

pub use assign::{AssignOptions, assign_apps};

const REQUIRED_COLUMNS: [&str; 5] = ["commitid", "application", "deploymentmethod", "whitelist", "blacklist"];

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("manifest is missing the '{0}' column")]
  MissingHeader(String),

  #[error("manifest row {row}: invalid host pattern '{pattern}': {source}")]
  InvalidPattern {
    row: usize,
    pattern: String,
    #[source]
    source: regex::Error,
  },

  #[error("application '{app}' uses unknown deployment method '{method}'")]
  UnknownMethod { app: String, method: String },

  #[error("manifest assigns no applications to any host")]
  NoApplications,
}

/// One manifest row.
#[derive(Debug, Clone)]
pub struct ManifestRow {
  /// `None` when the cell is empty or `N/A`.
  pub commit_id: Option<String>,
  pub app: String,
  pub method: String,
  pub whitelist: Vec<Regex>,
  pub blacklist: Vec<Regex>,
}

impl ManifestRow {
  /// A blacklist pattern longer than one character rejects first; otherwise any whitelist match accepts.
  pub fn applies_to(&self, hostname: &str) -> bool {
    if self
      .blacklist
      .iter()
      .any(|re| re.as_str().len() > 1 && re.is_match(hostname))
    {
      return false;
    }
    self.whitelist.iter().any(|re| re.is_match(hostname))
  }
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
  pub rows: Vec<ManifestRow>,
}

impl Manifest {
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&text)
  }

  pub fn parse(text: &str) -> Result<Self, ManifestError> {
    let mut rows = csv::parse_rows(text).into_iter();
    let header = rows.next().unwrap_or_default();
    let normalized: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();

    let mut columns = [0usize; REQUIRED_COLUMNS.len()];
    for (slot, name) in columns.iter_mut().zip(REQUIRED_COLUMNS) {
      *slot = normalized
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| ManifestError::MissingHeader(name.to_string()))?;
    }
    let [commit_col, app_col, method_col, white_col, black_col] = columns;

    let mut manifest = Manifest::default();
    for (index, fields) in rows.enumerate() {
      if fields.len() < 2 {
        continue;
      }
      let row_number = index + 2;
      let cell = |col: usize| fields.get(col).map(|f| f.trim()).unwrap_or_default();

      let commit_id = match cell(commit_col) {
        "" | "N/A" => None,
        commit => Some(commit.to_string()),
      };
      let row = ManifestRow {
        commit_id,
        app: cell(app_col).to_string(),
        method: cell(method_col).to_string(),
        whitelist: compile_patterns(cell(white_col), row_number)?,
        blacklist: compile_patterns(cell(black_col), row_number)?,
      };
      debug!(row = row_number, app = %row.app, method = %row.method, "manifest row");
      manifest.rows.push(row);
    }

    Ok(manifest)
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }
}

fn normalize_header(header: &str) -> String {
  header
    .trim()
    .chars()
    .filter(|c| !matches!(c, '-' | '_' | ' '))
    .flat_map(char::to_lowercase)
    .collect()
}

fn compile_patterns(cell: &str, row: usize) -> Result<Vec<Regex>, ManifestError> {
  cell
    .split(',')
    .map(str::trim)
    .map(|pattern| {
      Regex::new(pattern).map_err(|source| ManifestError::InvalidPattern {
        row,
        pattern: pattern.to_string(),
        source,
      })
    })
    .collect()
}
