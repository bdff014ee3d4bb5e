//! Full deploy runs against fake hosts.

use fleetroll_lib::host::Connectivity;
use fleetroll_lib::orchestrate::{self, RunMode, RunPaths};
use fleetroll_lib::run_lock::RunLock;

use super::common::{Fixture, REFNAME, read, snapshot_apps};

const SH1: &str = "splsh001-east";
const SH2: &str = "splsh002-east";

fn two_apps() -> Fixture {
  let mut fixture = Fixture::new(&[SH1]);
  fixture.app("TA-nix").app("TA-web");
  fixture.set_manifest(&[",TA-nix,search_head,^splsh,", ",TA-web,search_head,^splsh,"]);
  fixture
}

#[tokio::test]
async fn first_run_installs_every_application() {
  let fixture = two_apps();

  let report = fixture.run(fixture.options(RunMode::Deploy)).await;

  assert!(report.changed);
  assert!(report.is_success(), "{report:?}");
  assert_eq!(report.hosts.len(), 1);
  assert_eq!(report.hosts[0].added, vec!["TA-nix", "TA-web"]);

  let commands = fixture.fleet.commands_for(SH1);
  assert!(commands.contains(&"sudo tar -zxvf splsh001-east.tar.gz -C /opt/app".to_string()));
  assert!(commands.contains(&"/opt/app/etc/bin/app reload".to_string()));
  assert_eq!(commands.last().unwrap(), "find /opt/app/etc/fleetroll/logs -type f -mtime +30 -delete");

  let installed = fixture.fleet.installed(SH1).expect("snapshot shipped in bundle");
  assert_eq!(snapshot_apps(&installed), vec!["TA-nix", "TA-web"]);
  let local = read(&fixture.snapshots().path_for(SH1));
  assert_eq!(snapshot_apps(&local), vec!["TA-nix", "TA-web"]);
}

#[tokio::test]
async fn second_run_without_changes_does_nothing() {
  let fixture = two_apps();
  fixture.run(fixture.options(RunMode::Deploy)).await;
  fixture.fleet.clear_commands();

  let report = fixture.run(fixture.options(RunMode::Deploy)).await;

  assert!(!report.changed);
  assert!(report.hosts.is_empty());
  assert!(fixture.fleet.commands_for(SH1).is_empty());
}

#[tokio::test]
async fn removed_row_deletes_the_application() {
  let mut fixture = two_apps();
  fixture.run(fixture.options(RunMode::Deploy)).await;
  fixture.set_manifest(&[",TA-nix,search_head,^splsh,"]);
  fixture.fleet.clear_commands();

  let report = fixture.run(fixture.options(RunMode::Deploy)).await;

  assert!(report.changed);
  assert_eq!(report.hosts[0].deleted, vec!["TA-web"]);
  assert!(report.hosts[0].added.is_empty());
  let commands = fixture.fleet.commands_for(SH1);
  assert!(commands.contains(&"sudo rm -rf /opt/app/etc/apps/web".to_string()), "{commands:?}");
  assert_eq!(snapshot_apps(&fixture.fleet.installed(SH1).unwrap()), vec!["TA-nix"]);

  // the deletion is recorded, so nothing is left to do
  let report = fixture.run(fixture.options(RunMode::Deploy)).await;
  assert!(!report.changed);
}

#[tokio::test]
async fn new_commit_marks_the_application_changed() {
  let mut fixture = Fixture::new(&[SH1]);
  fixture.app("TA-nix");
  fixture.set_manifest(&["abc1234,TA-nix,search_head,^splsh,"]);
  fixture.run(fixture.options(RunMode::Deploy)).await;

  fixture.set_manifest(&["def5678,TA-nix,search_head,^splsh,"]);
  let report = fixture.run(fixture.options(RunMode::Deploy)).await;

  assert!(report.changed);
  assert_eq!(report.hosts[0].changed, vec!["TA-nix"]);
  let commands = fixture.fleet.commands_for(SH1);
  assert!(commands.iter().any(|c| c == "sudo rm -f /opt/app/etc/apps/nix/app_version*"));
}

#[tokio::test]
async fn duplicate_rows_install_once() {
  let mut fixture = Fixture::new(&[SH1]);
  fixture.app("TA-nix");
  fixture.set_manifest(&[
    "abc1234,TA-nix,search_head,^splsh,",
    "abc1234,TA-nix,search_head,^splsh,",
    "abc1234,TA-nix,search_head,^spl,",
  ]);

  let report = fixture.run(fixture.options(RunMode::Deploy)).await;

  assert_eq!(report.hosts[0].added, vec!["TA-nix"]);
  assert_eq!(snapshot_apps(&fixture.fleet.installed(SH1).unwrap()), vec!["TA-nix"]);
}

#[tokio::test]
async fn missing_artifact_holds_back_only_its_host() {
  let mut fixture = Fixture::new(&[SH1, SH2]);
  fixture.app("TA-nix");
  fixture.set_manifest(&[",TA-nix,search_head,^splsh,", ",TA-ghost,search_head,^splsh002,"]);

  let report = fixture.run(fixture.options(RunMode::Deploy)).await;

  assert!(report.changed);
  assert!(!report.is_success());
  assert_eq!(report.errors.len(), 1);
  assert!(report.errors[0].contains("TA-ghost"), "{:?}", report.errors);

  assert_eq!(snapshot_apps(&fixture.fleet.installed(SH1).unwrap()), vec!["TA-nix"]);
  assert!(fixture.snapshots().exists(SH1));

  let held = report.hosts.iter().find(|h| h.hostname == SH2).unwrap();
  assert!(!held.failures.is_empty());
  assert!(fixture.fleet.installed(SH2).is_none());
  assert!(!fixture.snapshots().exists(SH2));
  assert!(fixture.fleet.commands_for(SH2).iter().all(|c| c.starts_with("cat ")));
}

#[tokio::test]
async fn unreachable_host_does_not_stop_the_others() {
  let mut fixture = Fixture::new(&[SH1, SH2]);
  fixture.app("TA-nix");
  fixture.set_manifest(&[",TA-nix,search_head,^splsh,"]);
  fixture.fleet.unreachable(SH2);

  let report = fixture.run(fixture.options(RunMode::Deploy)).await;

  assert!(report.changed);
  assert!(report.is_success(), "host failures do not fail the run");
  assert!(report.has_host_failures());
  let down = report.hosts.iter().find(|h| h.hostname == SH2).unwrap();
  assert_eq!(down.connectivity, Connectivity::Unreachable);
  assert!(!down.failures.is_empty());
  assert!(!fixture.snapshots().exists(SH2));

  assert!(fixture.fleet.installed(SH1).is_some());
  assert!(fixture.snapshots().exists(SH1));
}

#[tokio::test]
async fn lost_local_cache_is_refetched_from_the_host() {
  let fixture = two_apps();
  fixture.run(fixture.options(RunMode::Deploy)).await;
  std::fs::remove_file(fixture.snapshots().path_for(SH1)).unwrap();
  fixture.fleet.clear_commands();

  let report = fixture.run(fixture.options(RunMode::Deploy)).await;

  assert!(!report.changed);
  assert_eq!(
    fixture.fleet.commands_for(SH1),
    vec!["cat /opt/app/etc/fleetroll/meta_main.json".to_string()]
  );
  assert!(fixture.snapshots().exists(SH1));
}

#[cfg(unix)]
#[tokio::test]
async fn held_lock_skips_the_whole_run() {
  let fixture = two_apps();
  let paths = RunPaths::new(&fixture.scratch, REFNAME);
  let _lock = RunLock::acquire(&paths.root, "deploy main").unwrap();

  let report = orchestrate::run(&fixture.options(RunMode::Deploy)).await.unwrap();

  assert!(!report.changed);
  assert!(report.is_success());
  assert!(report.hosts.is_empty());
  assert_eq!(report.locked_by.map(|h| h.command), Some("deploy main".to_string()));

  // no checkout, no staging, no cached snapshots
  let entries: Vec<String> = std::fs::read_dir(&paths.root)
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  assert_eq!(entries, vec![".lock".to_string()]);
  assert!(!fixture.snapshots().exists(SH1));
}

mod idempotence {
  use proptest::prelude::*;

  use super::*;

  const APPS: [&str; 4] = ["TA-a", "TA-b", "TA-c", "TA-d"];

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn rerun_of_the_same_manifest_is_a_no_op(
      first in proptest::sample::subsequence(APPS.to_vec(), 1..=4),
      second in proptest::sample::subsequence(APPS.to_vec(), 1..=4),
    ) {
      let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
      runtime.block_on(async {
        let mut fixture = Fixture::new(&[SH1]);
        for app in APPS {
          fixture.app(app);
        }

        for selection in [&first, &second] {
          let rows: Vec<String> = selection.iter().map(|a| format!(",{a},search_head,^splsh,")).collect();
          fixture.set_manifest(&rows.iter().map(String::as_str).collect::<Vec<_>>());
          fixture.run(fixture.options(RunMode::Deploy)).await;

          let again = fixture.run(fixture.options(RunMode::Deploy)).await;
          prop_assert!(!again.changed);

          let mut expected: Vec<String> = selection.iter().map(|a| a.to_string()).collect();
          expected.sort();
          prop_assert_eq!(snapshot_apps(&fixture.fleet.installed(SH1).unwrap()), expected);
        }
        Ok::<(), TestCaseError>(())
      })?;
    }
  }
}
