use std::collections::BTreeSet;

use proptest::prelude::*;
use tracing_test::traced_test;

use super::*;
use crate::method::{DeploymentMethod, UpdateMode};

const HOST: &str = "splsh001-easttest";

fn method(name: &str, path: &str) -> DeploymentMethod {
  DeploymentMethod::new(name, path, UpdateMode::Copy)
}

fn desired(name: &str, commit: Option<&str>, method: &DeploymentMethod) -> Application {
  Application::new(name, name, method.clone(), commit.map(str::to_string), HOST, &Track::new())
}

fn everything() -> impl ArtifactSource {
  |_: &str| true
}

fn options() -> ReconcileOptions {
  ReconcileOptions {
    strict_commit_ids: false,
    head_commit_id: Some("head".into()),
  }
}

fn statuses(result: &Reconciliation) -> Vec<(&str, AppStatus)> {
  result.apps.iter().map(|a| (a.name.as_str(), a.status())).collect()
}

/// Reconcile, then persist the list snapshot as the next baseline.
fn run(desired: &[Application], previous: Option<&MetaSnapshot>) -> (Reconciliation, MetaSnapshot) {
  let result = reconcile(HOST, desired, previous, &everything(), &options());
  let snapshot = result.list_snapshot(&Track::new());
  (result, snapshot)
}

#[test]
fn empty_snapshot_adds_everything() {
  let m = method("search", "etc/apps");
  let (result, _) = run(&[desired("A", Some("c1"), &m), desired("B", Some("c2"), &m)], None);
  assert_eq!(statuses(&result), [("A", AppStatus::Added), ("B", AppStatus::Added)]);
  assert!(!result.is_unchanged());
  assert_eq!(result.change_count(), 2);
}

#[test]
fn missing_from_desired_is_deleted() {
  let m = method("search", "etc/apps");
  let (_, baseline) = run(&[desired("A", Some("c1"), &m), desired("B", Some("c2"), &m)], None);

  let (result, next) = run(&[desired("A", Some("c1"), &m)], Some(&baseline));
  assert_eq!(statuses(&result), [("A", AppStatus::Unchanged), ("B", AppStatus::Deleted)]);

  let update = result.update_snapshot(&Track::new());
  assert_eq!(update.content.len(), 1);
  assert_eq!(update.content[0].name, "B");
  assert_eq!(next.content.len(), 1);
}

#[test]
fn unchanged_record_carries_current_method_config() {
  let old = method("search", "etc/apps");
  let (_, baseline) = run(&[desired("A", Some("c1"), &old)], None);

  let mut new = method("search", "etc/apps");
  new.restart = true;
  new.commands.install.push("reload".into());
  let (result, _) = run(&[desired("A", Some("c1"), &new)], Some(&baseline));

  assert_eq!(statuses(&result), [("A", AppStatus::Unchanged)]);
  assert!(result.is_unchanged());
  assert!(result.apps[0].method.restart);
  assert_eq!(result.apps[0].method.commands.install, ["reload"]);
}

#[test]
fn unchanged_record_keeps_inclusions_from_the_host() {
  let m = method("search", "etc/apps");
  let (_, mut baseline) = run(&[desired("A", Some("c1"), &m)], None);
  baseline.content[0].inclusions = vec!["local/inputs.conf".into()];

  let (result, _) = run(&[desired("A", Some("c1"), &m)], Some(&baseline));
  assert_eq!(result.apps[0].inclusions, ["local/inputs.conf"]);
}

#[test]
fn new_commit_is_changed() {
  let m = method("search", "etc/apps");
  let (_, baseline) = run(&[desired("A", Some("c1"), &m)], None);

  let (result, _) = run(&[desired("A", Some("c2"), &m)], Some(&baseline));
  assert_eq!(statuses(&result), [("A", AppStatus::Changed)]);
  assert_eq!(result.apps[0].commit_id.as_deref(), Some("c2"));
}

#[test]
#[traced_test]
fn duplicates_collapse_to_one_record() {
  let m = method("search", "etc/apps");
  let app = desired("A", Some("c1"), &m);
  let (result, _) = run(&[app.clone(), app.clone(), app], None);

  assert_eq!(result.apps.len(), 1);
  assert_eq!(result.duplicates.len(), 1);
  assert_eq!(result.duplicates[0].count, 3);
  assert!(logs_contain("duplicate application in manifest"));
}

#[test]
fn output_is_sorted_by_name_commit_method() {
  let m = method("search", "etc/apps");
  let (result, _) = run(
    &[desired("C", Some("c1"), &m), desired("A", Some("c9"), &m), desired("B", Some("c5"), &m)],
    None,
  );
  let names: Vec<_> = result.apps.iter().map(|a| a.name.as_str()).collect();
  assert_eq!(names, ["A", "B", "C"]);
}

#[test]
fn same_app_and_method_keeps_one_commit() {
  let m = method("search", "etc/apps");
  let (result, _) = run(&[desired("A", Some("c2"), &m), desired("A", Some("c1"), &m)], None);
  assert_eq!(result.apps.len(), 1);
  assert_eq!(result.apps[0].commit_id.as_deref(), Some("c1"));
}

#[test]
fn same_key_keeps_the_first_row() {
  let m = method("search", "etc/apps");
  let plain = desired("A", Some("c1"), &m);
  let mut seeded = desired("A", Some("c1"), &m);
  seeded.firstrun = true;

  let (result, _) = run(&[plain.clone(), seeded.clone()], None);
  assert!(!result.apps[0].firstrun);

  let (result, _) = run(&[seeded, plain], None);
  assert!(result.apps[0].firstrun);
  assert_eq!(result.duplicates[0].count, 2);
}

#[test]
fn missing_artifact_is_reported_and_keeps_installed_record() {
  let m = method("search", "etc/apps");
  let (_, baseline) = run(&[desired("A", Some("c1"), &m), desired("B", Some("c1"), &m)], None);

  let artifacts: BTreeSet<String> = ["A".to_string()].into();
  let result = reconcile(
    HOST,
    &[desired("A", Some("c2"), &m), desired("B", Some("c2"), &m), desired("Z", Some("c1"), &m)],
    Some(&baseline),
    &artifacts,
    &options(),
  );

  assert_eq!(statuses(&result), [("A", AppStatus::Changed), ("B", AppStatus::Unchanged)]);
  assert_eq!(result.apps[1].commit_id.as_deref(), Some("c1"));
  assert_eq!(
    result.errors,
    [
      ReconcileError::ArtifactMissing {
        hostname: HOST.into(),
        app: "B".into()
      },
      ReconcileError::ArtifactMissing {
        hostname: HOST.into(),
        app: "Z".into()
      },
    ]
  );
}

#[test]
fn commit_id_falls_back_to_head_unless_strict() {
  let m = method("search", "etc/apps");
  let (result, _) = run(&[desired("A", None, &m)], None);
  assert_eq!(result.apps[0].commit_id.as_deref(), Some("head"));

  let strict = ReconcileOptions {
    strict_commit_ids: true,
    ..options()
  };
  let result = reconcile(HOST, &[desired("A", None, &m)], None, &everything(), &strict);
  assert!(result.apps.is_empty());
  assert!(matches!(result.errors[0], ReconcileError::MissingCommitId { .. }));
}

#[test]
fn resolution_happens_before_classification() {
  let m = method("search", "etc/apps");
  let (_, baseline) = run(&[desired("A", Some("head"), &m)], None);

  // same commit once resolved, so not a change
  let (result, _) = run(&[desired("A", None, &m)], Some(&baseline));
  assert_eq!(statuses(&result), [("A", AppStatus::Unchanged)]);
}

#[test]
fn moved_application_is_one_change() {
  let old = method("search", "etc/apps");
  let (_, baseline) = run(&[desired("A", Some("c1"), &old)], None);

  let new = method("search_slave", "etc/slave-apps");
  let (result, next) = run(&[desired("A", Some("c1"), &new)], Some(&baseline));

  assert_eq!(statuses(&result), [("A", AppStatus::Changed)]);
  assert_eq!(result.apps[0].method.name, "search_slave");
  assert_eq!(
    result.moved,
    [AppIdentity {
      name: "A".into(),
      method: "search".into()
    }]
  );

  let (again, _) = run(&[desired("A", Some("c1"), &new)], Some(&next));
  assert!(again.is_unchanged());
}

#[test]
fn method_change_at_same_path_deletes_old_record() {
  let old = method("search", "etc/apps");
  let (_, baseline) = run(&[desired("A", Some("c1"), &old)], None);

  let new = method("search_v2", "etc/apps");
  let (result, _) = run(&[desired("A", Some("c1"), &new)], Some(&baseline));
  assert_eq!(statuses(&result), [("A", AppStatus::Added), ("A", AppStatus::Deleted)]);
}

#[test]
fn firstrun_records_never_reach_the_baseline() {
  let m = method("search", "etc/apps");
  let mut seeded = desired("seed", Some("c1"), &m);
  seeded.firstrun = true;
  let (result, baseline) = run(&[desired("A", Some("c1"), &m), seeded], None);

  assert_eq!(result.apps.len(), 2);
  assert_eq!(baseline.content.len(), 1);
  assert!(result.update_snapshot(&Track::new()).content.iter().all(|a| !a.firstrun));
}

fn arb_desired() -> impl Strategy<Value = Vec<Application>> {
  let methods = [method("search", "etc/apps"), method("deploy", "etc/deployment-apps"), method("slave", "etc/slave-apps")];
  prop::collection::vec((0..6usize, prop::option::of(0..3usize), 0..3usize), 0..12).prop_map(move |rows| {
    rows
      .into_iter()
      .map(|(name, commit, m)| {
        let commit = commit.map(|c| format!("c{c}"));
        desired(&format!("app{name}"), commit.as_deref(), &methods[m])
      })
      .collect()
  })
}

proptest! {
  /// A second pass over the same desired set changes nothing.
  #[test]
  fn reconcile_is_idempotent(first in arb_desired(), second in arb_desired()) {
    let (_, baseline) = run(&first, None);
    let (_, baseline) = run(&second, Some(&baseline));
    let (result, _) = run(&second, Some(&baseline));
    prop_assert!(result.is_unchanged(), "{:?}", statuses(&result));
  }
}
