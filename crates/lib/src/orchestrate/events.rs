//! One structured event per application a rollout touches.
//!
//! Events go to their own target so a subscriber can route them to a
//! separate file and keep them off the console.

use tracing::info;

use crate::reconcile::Reconciliation;

pub const EVENT_TARGET: &str = "fleetroll_lib::event";

/// Emit an event for every application of a host about to be rolled out.
pub fn log_app_events(reconciliation: &Reconciliation) {
  for app in &reconciliation.apps {
    let abbrev = app.commit_log.as_ref().map(|log| log.abbrev_commit_id.as_str());
    let author = app.commit_log.as_ref().map(|log| log.author_name.as_str());
    info!(
      target: EVENT_TARGET,
      host = %reconciliation.hostname,
      app = %app.name,
      status = %app.status(),
      updated = app.status().is_updated(),
      method = %app.method.name,
      commit_id = app.commit_id.as_deref().unwrap_or_default(),
      abbrev_commit_id = abbrev.unwrap_or_default(),
      author = author.unwrap_or_default(),
      firstrun = app.firstrun,
      "application event"
    );
  }
}
