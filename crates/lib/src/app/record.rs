//! Wire schema for [`Application`].
//!
//! Keeps the persisted field set explicit and recomputes `updated` from the
//! status on load instead of trusting the stored flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::method::DeploymentMethod;

use super::status::AppStatus;
use super::types::{Application, CommitLog, Track};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
  pub name: String,
  pub clean_name: String,
  pub method: DeploymentMethod,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub commit_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub commit_log: Option<CommitLog>,
  pub status: AppStatus,
  #[serde(default)]
  pub updated: bool,
  #[serde(default)]
  pub firstrun: bool,
  pub created_at: DateTime<Utc>,
  pub track: Track,
  pub source_hostname: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repo_source: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub inclusions: Vec<String>,
}

impl From<ApplicationRecord> for Application {
  fn from(record: ApplicationRecord) -> Self {
    Application {
      name: record.name,
      clean_name: record.clean_name,
      method: record.method,
      commit_id: record.commit_id,
      commit_log: record.commit_log,
      status: record.status,
      updated: record.status.is_updated(),
      firstrun: record.firstrun,
      created_at: record.created_at,
      track: record.track,
      source_hostname: record.source_hostname,
      repo_source: record.repo_source,
      inclusions: record.inclusions,
    }
  }
}

impl From<Application> for ApplicationRecord {
  fn from(app: Application) -> Self {
    ApplicationRecord {
      name: app.name,
      clean_name: app.clean_name,
      method: app.method,
      commit_id: app.commit_id,
      commit_log: app.commit_log,
      status: app.status,
      updated: app.updated,
      firstrun: app.firstrun,
      created_at: app.created_at,
      track: app.track,
      source_hostname: app.source_hostname,
      repo_source: app.repo_source,
      inclusions: app.inclusions,
    }
  }
}
