use tracing::{debug, info};

use crate::app::{Application, Track};
use crate::host::naming::DEFAULT_SITE;
use crate::host::{Host, HostNameFormat, HostRegistry};
use crate::method::DeploymentMethods;

use super::{Manifest, ManifestError, ManifestRow};

pub struct AssignOptions<'a> {
  /// Key the apps are filed under on each host.
  pub source: &'a str,
  /// Seed startup bootstrap apps onto hosts without a snapshot.
  pub firstrun: bool,
  pub format: &'a HostNameFormat,
  pub track: &'a Track,
}

/// Attach every manifest row to the hosts it applies to. Returns the number of assignments.
pub fn assign_apps(
  manifest: &Manifest,
  hosts: &mut HostRegistry,
  methods: &DeploymentMethods,
  options: &AssignOptions<'_>,
) -> Result<usize, ManifestError> {
  let mut assigned = 0;

  for row in &manifest.rows {
    for host in hosts.iter_mut() {
      let hostname = host.hostname.clone();
      if add_app(host, &hostname, row, None, methods, options)? {
        assigned += 1;
      }
      assigned += bootstrap_firstrun(host, row, methods, options)?;
    }
  }

  if assigned == 0 {
    return Err(ManifestError::NoApplications);
  }
  info!(assignments = assigned, hosts = hosts.len(), "manifest assigned");
  Ok(assigned)
}

fn bootstrap_firstrun(
  host: &mut Host,
  row: &ManifestRow,
  methods: &DeploymentMethods,
  options: &AssignOptions<'_>,
) -> Result<usize, ManifestError> {
  if !options.firstrun || host.manifest_found {
    return Ok(0);
  }
  host.restart = true;

  let bootstrap = methods
    .bootstrap()
    .iter()
    .find(|b| b.ref_class == host.app_class && options.format.matches_affixes(&host.hostname));
  let Some(bootstrap) = bootstrap else {
    return Ok(0);
  };
  if bootstrap.update_method != row.method {
    return Ok(0);
  }

  host.bootstrap = true;
  let reference = options.format.build(&bootstrap.app_class, DEFAULT_SITE, 1);
  let added = add_app(host, &reference, row, Some(&bootstrap.ref_method), methods, options)?;
  if added {
    debug!(host = %host.hostname, app = %row.app, reference = %reference, "bootstrapping first-run application");
  }
  Ok(usize::from(added))
}

fn add_app(
  host: &mut Host,
  hostname: &str,
  row: &ManifestRow,
  method_override: Option<&str>,
  methods: &DeploymentMethods,
  options: &AssignOptions<'_>,
) -> Result<bool, ManifestError> {
  if !row.applies_to(hostname) {
    return Ok(false);
  }

  let method_name = method_override.unwrap_or(&row.method);
  let method = methods.get(method_name).ok_or_else(|| ManifestError::UnknownMethod {
    app: row.app.clone(),
    method: method_name.to_string(),
  })?;

  let mut app = Application::new(
    &row.app,
    &methods.clean_name(&row.app),
    method.clone(),
    row.commit_id.clone(),
    hostname,
    options.track,
  );
  app.firstrun = method_override.is_some();
  host.add_app(options.source, app);
  Ok(true)
}
