use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::host::{Host, HostOutcome, HostRegistry};

use super::Stage;

/// Work done for one host inside a partition.
///
/// Workers get an owned copy of the host and report back only through the
/// returned outcome.
#[async_trait]
pub trait HostWorker: Send + Sync + 'static {
  async fn run(&self, host: Host) -> HostOutcome;
}

/// Run `worker` over `hosts`, at most `limit` at a time, and wait for all of them.
///
/// A limit of one, or fewer than two hosts, runs sequentially in the caller.
pub async fn dispatch<W: HostWorker>(hosts: Vec<Host>, limit: usize, worker: Arc<W>) -> Vec<HostOutcome> {
  if limit <= 1 || hosts.len() < 2 {
    let mut outcomes = Vec::with_capacity(hosts.len());
    for host in hosts {
      outcomes.push(worker.run(host).await);
    }
    return outcomes;
  }

  let semaphore = Arc::new(Semaphore::new(limit));
  let mut join_set = JoinSet::new();
  let mut pending: HashMap<tokio::task::Id, HostOutcome> = HashMap::new();

  for host in hosts {
    let fallback = host.outcome();
    let semaphore = semaphore.clone();
    let worker = worker.clone();
    let handle = join_set.spawn(async move {
      let Ok(_permit) = semaphore.acquire().await else {
        let mut outcome = host.outcome();
        outcome.failures.push("dispatch aborted".to_string());
        return outcome;
      };
      worker.run(host).await
    });
    pending.insert(handle.id(), fallback);
  }

  let mut outcomes = Vec::with_capacity(pending.len());
  while let Some(joined) = join_set.join_next_with_id().await {
    match joined {
      Ok((id, outcome)) => {
        pending.remove(&id);
        outcomes.push(outcome);
      }
      Err(e) => {
        let Some(mut outcome) = pending.remove(&e.id()) else {
          error!(error = %e, "host worker failed");
          continue;
        };
        error!(host = %outcome.hostname, error = %e, "host worker panicked");
        outcome.failures.push(format!("worker panicked: {e}"));
        outcomes.push(outcome);
      }
    }
  }

  outcomes
}

/// Run every stage in order, merging outcomes into `registry` after each barrier.
pub async fn run_stages<W, F>(registry: &mut HostRegistry, stages: &[Stage], limit: usize, worker_for: F)
where
  W: HostWorker,
  F: Fn(&Stage) -> Arc<W>,
{
  for stage in stages {
    info!(
      phase = %stage.phase,
      boot_group = stage.group_index,
      site = stage.site.as_deref().unwrap_or("all"),
      hosts = stage.hosts.len(),
      "starting stage"
    );

    let hosts = registry.snapshot_of(&stage.hosts);
    let outcomes = dispatch(hosts, limit, worker_for(stage)).await;
    merge_outcomes(registry, outcomes);
  }
}

pub(crate) fn merge_outcomes(registry: &mut HostRegistry, outcomes: Vec<HostOutcome>) {
  for outcome in outcomes {
    let hostname = outcome.hostname.clone();
    if !registry.merge(outcome) {
      warn!(host = %hostname, "outcome for a host not in the registry");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use super::*;
  use crate::host::{Connectivity, HostName};
  use crate::method::Phase;

  fn host(name: &str) -> Host {
    let hn = HostName {
      app_class: "sh".into(),
      site: "east".into(),
      index: 1,
    };
    Host::new(name, None, hn, PathBuf::from("/tmp/x.json"))
  }

  /// Tracks peak concurrency and marks every host reachable.
  #[derive(Default)]
  struct Counting {
    active: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<String>>,
  }

  #[async_trait]
  impl HostWorker for Counting {
    async fn run(&self, mut host: Host) -> HostOutcome {
      let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(20)).await;
      self.active.fetch_sub(1, Ordering::SeqCst);
      self.seen.lock().unwrap().push(host.hostname.clone());
      host.connectivity = Connectivity::Reachable;
      host.outcome()
    }
  }

  struct Panicking;

  #[async_trait]
  impl HostWorker for Panicking {
    async fn run(&self, host: Host) -> HostOutcome {
      if host.hostname == "bad" {
        panic!("boom");
      }
      host.outcome()
    }
  }

  #[tokio::test]
  async fn concurrency_is_bounded() {
    let worker = Arc::new(Counting::default());
    let hosts: Vec<Host> = (0..6).map(|i| host(&format!("h{i}"))).collect();

    let outcomes = dispatch(hosts, 2, worker.clone()).await;

    assert_eq!(outcomes.len(), 6);
    assert!(worker.peak.load(Ordering::SeqCst) <= 2);
    assert!(outcomes.iter().all(|o| o.connectivity == Connectivity::Reachable));
  }

  #[tokio::test]
  async fn limit_one_runs_in_order() {
    let worker = Arc::new(Counting::default());
    let hosts = vec![host("a"), host("b"), host("c")];
    dispatch(hosts, 1, worker.clone()).await;
    assert_eq!(*worker.seen.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(worker.peak.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn panics_become_failures() {
    let outcomes = dispatch(vec![host("good"), host("bad")], 4, Arc::new(Panicking)).await;
    let bad = outcomes.iter().find(|o| o.hostname == "bad").unwrap();
    assert!(bad.failures[0].contains("panicked"));
    assert!(outcomes.iter().any(|o| o.hostname == "good" && o.failures.is_empty()));
  }

  #[tokio::test]
  async fn stages_merge_back_by_hostname() {
    let mut registry = HostRegistry::new();
    registry.insert(host("a")).unwrap();
    registry.insert(host("b")).unwrap();

    let stages = vec![Stage {
      phase: Phase::Install,
      group_index: 0,
      site: Some("east".into()),
      hosts: vec!["a".into(), "b".into()],
    }];
    let worker = Arc::new(Counting::default());
    run_stages(&mut registry, &stages, 4, |_| worker.clone()).await;

    assert!(registry.iter().all(|h| h.connectivity == Connectivity::Reachable));
  }
}
