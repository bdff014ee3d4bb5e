use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::consts::{CONNECT_RETRY_BACKOFF, MAX_CONNECT_ATTEMPTS};
use crate::host::{Connectivity, Host};

use super::RemoteShell;

/// Probe `host`, retrying transient failures.
pub async fn check_connection<S: RemoteShell + ?Sized>(shell: &S, host: &Host) -> Connectivity {
  for attempt in 1..=MAX_CONNECT_ATTEMPTS {
    match shell.check(host).await {
      Ok(()) => {
        debug!(host = %host.hostname, attempt, "host reachable");
        return Connectivity::Reachable;
      }
      Err(e) if e.is_terminal() => {
        error!(host = %host.hostname, error = %e, "cannot connect to host");
        return Connectivity::Unreachable;
      }
      Err(e) => {
        if attempt == 1 {
          warn!(host = %host.hostname, error = %e, "problem connecting to host, retrying");
        }
        if attempt < MAX_CONNECT_ATTEMPTS {
          sleep(CONNECT_RETRY_BACKOFF).await;
        }
      }
    }
  }

  error!(host = %host.hostname, attempts = MAX_CONNECT_ATTEMPTS, "cannot connect to host");
  Connectivity::Unreachable
}

/// Cached connectivity: probes only while it is still unknown.
pub async fn ensure_connected<S: RemoteShell + ?Sized>(shell: &S, host: &mut Host) -> bool {
  if !host.connectivity.is_known() {
    host.connectivity = check_connection(shell, host).await;
  }
  host.connectivity.is_reachable()
}
