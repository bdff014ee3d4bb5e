use std::time::Duration;

pub const APP_NAME: &str = "fleetroll";

/// Overrides the scratch location used for the repository checkout, staging and cached snapshots.
pub const HOME_ENV_VAR: &str = "FLEETROLL_HOME";

/// Directory inside the remote applications folder holding snapshot files.
pub const META_DIR: &str = "fleetroll";
pub const META_LOGS_DIR: &str = "logs";
pub const META_FILE_PREFIX: &str = "meta_";

/// Directory in the repository holding the manifest and configuration files.
pub const CONFIG_DIR: &str = "configs";
pub const DEPLOYMENT_METHODS_FILENAME: &str = "deploymentmethods.conf";
pub const COMMANDS_FILENAME: &str = "commands.conf";

pub const VERSION_FILE_PREFIX: &str = "app_version";
pub const IGNORE_STAGING_DIR: &str = "ignore_tmp";
pub const DEFAULT_APP_VERSION: &str = "1.0";

pub const RESTART_COMMAND: &str = "restart";
pub const DEFAULT_AUTH_SECTION: &str = "auth";

pub const DEFAULT_NUM_CONNECTIONS: usize = 10;
pub const META_LOG_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_COMMAND_DELAY: Duration = Duration::from_secs(30);

pub const MAX_CONNECT_ATTEMPTS: u32 = 3;
pub const CONNECT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interactive sessions give up after this long without output.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
/// Hard ceiling for a single remote command, discrete or interactive.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(600);

/// Exit status reported for commands cut off by a timeout, matching coreutils `timeout`.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit status reported when the remote side went away without reporting one.
pub const LOST_SESSION_EXIT_CODE: i32 = 255;

pub const MAX_UPLOAD_ATTEMPTS: u32 = 4;
pub const UPLOAD_RETRY_BACKOFF: Duration = Duration::from_secs(2);
