use std::fmt;

use serde::{Deserialize, Serialize};

/// Reconciliation outcome for one application on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
  Unchanged,
  Added,
  Changed,
  Deleted,
}

impl AppStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      AppStatus::Unchanged => "unchanged",
      AppStatus::Added => "added",
      AppStatus::Changed => "changed",
      AppStatus::Deleted => "deleted",
    }
  }

  /// Anything other than `unchanged` needs work on the host.
  pub fn is_updated(self) -> bool {
    self != AppStatus::Unchanged
  }
}

impl fmt::Display for AppStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A named subset of statuses used to filter reconciled records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSet(&'static [AppStatus]);

impl StatusSet {
  /// What is installed once the run completes.
  pub const CURRENT: StatusSet = StatusSet(&[AppStatus::Unchanged, AppStatus::Added, AppStatus::Changed]);
  /// What the host has to act on.
  pub const TO_UPDATE: StatusSet = StatusSet(&[AppStatus::Added, AppStatus::Changed, AppStatus::Deleted]);
  /// What has new content to ship.
  pub const CHANGED_ONLY: StatusSet = StatusSet(&[AppStatus::Added, AppStatus::Changed]);

  pub fn contains(self, status: AppStatus) -> bool {
    self.0.contains(&status)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn updated_is_everything_but_unchanged() {
    assert!(!AppStatus::Unchanged.is_updated());
    assert!(AppStatus::Added.is_updated());
    assert!(AppStatus::Changed.is_updated());
    assert!(AppStatus::Deleted.is_updated());
  }

  #[test]
  fn derived_sets() {
    assert!(StatusSet::CURRENT.contains(AppStatus::Unchanged));
    assert!(!StatusSet::CURRENT.contains(AppStatus::Deleted));
    assert!(StatusSet::TO_UPDATE.contains(AppStatus::Deleted));
    assert!(!StatusSet::TO_UPDATE.contains(AppStatus::Unchanged));
    assert!(StatusSet::CHANGED_ONLY.contains(AppStatus::Added));
    assert!(!StatusSet::CHANGED_ONLY.contains(AppStatus::Deleted));
  }

  #[test]
  fn serializes_lowercase() {
    assert_eq!(serde_json::to_string(&AppStatus::Changed).unwrap(), "\"changed\"");
  }
}
