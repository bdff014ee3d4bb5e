mod deploy;
mod plan;
mod status;

pub use deploy::cmd_deploy;
pub use plan::cmd_plan;
pub use status::{StatusArgs, cmd_status};
