use std::fs::File;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

use super::PackageError;

/// Write `source_dir` as a gzipped tarball whose single root entry is `root_name`.
pub fn write_bundle(source_dir: &Path, root_name: &str, tar_path: &Path) -> Result<(), PackageError> {
  if let Some(parent) = tar_path.parent() {
    std::fs::create_dir_all(parent).map_err(|e| PackageError::io(parent, e))?;
  }
  let bundle_err = |source| PackageError::Bundle {
    path: tar_path.to_path_buf(),
    source,
  };

  let file = File::create(tar_path).map_err(bundle_err)?;
  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
  builder.follow_symlinks(false);
  builder.append_dir_all(root_name, source_dir).map_err(bundle_err)?;
  builder.into_inner().and_then(GzEncoder::finish).map_err(bundle_err)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use flate2::read::GzDecoder;
  use tempfile::TempDir;

  #[test]
  fn bundle_roots_entries_under_name() {
    let temp = TempDir::new().unwrap();
    let host_dir = temp.path().join("hosts/sh01");
    std::fs::create_dir_all(host_dir.join("etc/apps/nix")).unwrap();
    std::fs::write(host_dir.join("etc/apps/nix/app.conf"), "[launcher]\n").unwrap();

    let tar_path = temp.path().join("tars/sh01.tar.gz");
    write_bundle(&host_dir, "apps", &tar_path).unwrap();

    let mut archive = tar::Archive::new(GzDecoder::new(File::open(&tar_path).unwrap()));
    let names: Vec<String> = archive
      .entries()
      .unwrap()
      .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
      .collect();
    assert!(names.iter().all(|n| n.starts_with("apps")), "{names:?}");
    assert!(names.iter().any(|n| n == "apps/etc/apps/nix/app.conf"));
  }
}
