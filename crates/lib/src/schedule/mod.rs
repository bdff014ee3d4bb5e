//! Staged rollout scheduling.
//!
//! A run walks `phase → boot group → site → hosts`. Each partition is a
//! barrier: every host in it finishes before the next partition starts.
//! Inside a partition hosts run concurrently, bounded by the connection
//! limit.

mod boot_order;
mod dispatch;
mod plan;

pub use boot_order::BootOrder;
pub use dispatch::{HostWorker, dispatch, run_stages};
pub use plan::{Stage, plan_stages};
