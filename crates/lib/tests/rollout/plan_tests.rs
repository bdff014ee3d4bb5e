//! Plan runs reconcile against the local cache and touch nothing.

use fleetroll_lib::orchestrate::RunMode;

use super::common::Fixture;

const SH1: &str = "splsh001-east";

#[tokio::test]
async fn plan_reports_changes_without_contacting_hosts() {
  let mut fixture = Fixture::new(&[SH1]);
  fixture.app("TA-nix").app("TA-web");
  fixture.set_manifest(&[",TA-nix,search_head,^splsh,", ",TA-web,search_head,^splsh,"]);

  let report = fixture.run(fixture.options(RunMode::Plan)).await;

  assert!(report.changed);
  assert_eq!(report.hosts[0].added, vec!["TA-nix", "TA-web"]);
  assert!(fixture.fleet.commands_for(SH1).is_empty());
  assert!(!fixture.snapshots().exists(SH1));
}

#[tokio::test]
async fn plan_after_deploy_sees_only_the_new_row() {
  let mut fixture = Fixture::new(&[SH1]);
  fixture.app("TA-nix").app("TA-web");
  fixture.set_manifest(&[",TA-nix,search_head,^splsh,"]);
  fixture.run(fixture.options(RunMode::Deploy)).await;
  fixture.fleet.clear_commands();

  fixture.set_manifest(&[",TA-nix,search_head,^splsh,", ",TA-web,search_head,^splsh,"]);
  let report = fixture.run(fixture.options(RunMode::Plan)).await;

  assert_eq!(report.hosts.len(), 1);
  assert_eq!(report.hosts[0].added, vec!["TA-web"]);
  assert_eq!(report.hosts[0].change_count(), 1);
  assert!(fixture.fleet.commands_for(SH1).is_empty());
}

#[tokio::test]
async fn plan_with_nothing_to_do_is_unchanged() {
  let mut fixture = Fixture::new(&[SH1]);
  fixture.app("TA-nix");
  fixture.set_manifest(&[",TA-nix,search_head,^splsh,"]);
  fixture.run(fixture.options(RunMode::Deploy)).await;

  let report = fixture.run(fixture.options(RunMode::Plan)).await;

  assert!(!report.changed);
  assert!(report.is_success());
  assert!(report.hosts.is_empty());
}
