//! Applications and their reconciliation status.

mod record;
mod status;
mod types;

pub use record::ApplicationRecord;
pub use status::{AppStatus, StatusSet};
pub use types::{AppIdentity, AppKey, Application, CommitLog, Track};
