use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Where the content of an application comes from.
pub trait ArtifactSource {
  fn exists(&self, app_name: &str) -> bool;
}

/// Applications are directories named after the app under one root (the repository checkout).
#[derive(Debug, Clone)]
pub struct DirectoryArtifacts {
  root: PathBuf,
}

impl DirectoryArtifacts {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn path_of(&self, app_name: &str) -> PathBuf {
    self.root.join(app_name)
  }
}

impl ArtifactSource for DirectoryArtifacts {
  fn exists(&self, app_name: &str) -> bool {
    !app_name.is_empty() && self.path_of(app_name).is_dir()
  }
}

impl ArtifactSource for BTreeSet<String> {
  fn exists(&self, app_name: &str) -> bool {
    self.contains(app_name)
  }
}

impl<F> ArtifactSource for F
where
  F: Fn(&str) -> bool,
{
  fn exists(&self, app_name: &str) -> bool {
    self(app_name)
  }
}
