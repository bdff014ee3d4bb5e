use crate::host::Host;
use crate::method::Phase;

/// One barrier-separated partition of the rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
  pub phase: Phase,
  /// Index into the expanded boot order.
  pub group_index: usize,
  /// `None` when sites are not split.
  pub site: Option<String>,
  pub hosts: Vec<String>,
}

/// Order every host with updates into stages.
///
/// `boot_order` must already be expanded. Sites come from all hosts, sorted;
/// `site_override` runs each boot group across all sites at once. Empty
/// partitions are dropped.
pub fn plan_stages<'a>(
  hosts: impl IntoIterator<Item = &'a Host>,
  boot_order: &[Vec<String>],
  site_override: bool,
) -> Vec<Stage> {
  let hosts: Vec<&Host> = hosts.into_iter().collect();
  let mut sites: Vec<&str> = hosts.iter().map(|h| h.site.as_str()).collect();
  sites.sort_unstable();
  sites.dedup();

  let changed: Vec<&Host> = hosts.iter().copied().filter(|h| h.has_updates()).collect();
  let mut stages = Vec::new();

  for phase in Phase::ALL {
    for (group_index, group) in boot_order.iter().enumerate() {
      let in_group: Vec<&Host> = changed.iter().copied().filter(|h| group.contains(&h.app_class)).collect();
      if in_group.is_empty() {
        continue;
      }

      if site_override {
        stages.push(Stage {
          phase,
          group_index,
          site: None,
          hosts: in_group.iter().map(|h| h.hostname.clone()).collect(),
        });
        continue;
      }

      for site in &sites {
        let at_site: Vec<String> = in_group
          .iter()
          .filter(|h| h.site == *site)
          .map(|h| h.hostname.clone())
          .collect();
        if !at_site.is_empty() {
          stages.push(Stage {
            phase,
            group_index,
            site: Some(site.to_string()),
            hosts: at_site,
          });
        }
      }
    }
  }

  stages
}
