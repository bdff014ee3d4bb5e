//! Host snapshots: what is installed on a host and what a run changes.

mod storage;
mod types;

pub use storage::SnapshotStore;
pub use types::{MetaSnapshot, SNAPSHOT_SCHEMA_VERSION, SnapshotError, SnapshotKind};
