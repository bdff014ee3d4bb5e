//! Hosts, their naming scheme, and the per-run registry.

pub mod naming;
mod registry;
mod types;

pub use naming::{HostName, HostNameFormat, NamingError};
pub use registry::{HostError, HostRegistry, build_registry, parse_host_spec};
pub use types::{Connectivity, Host, HostOutcome};
