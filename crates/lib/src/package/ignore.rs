use std::fs;
use std::path::Path;

use regex::Regex;
use walkdir::WalkDir;

use super::PackageError;

/// Paths moved by [`move_matching`], relative to the source root.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MoveReport {
  pub moved: Vec<String>,
  /// Pattern lines whose directory does not exist under the source root.
  pub missing: Vec<String>,
}

/// Move paths matching `patterns` from `src` to the same relative place under `dest`.
///
/// A pattern is `dir/` (the whole directory) or `dir/file-regex` (entries of
/// `dir` whose name matches). A bare `file-regex` selects entries of `src` itself.
pub fn move_matching(patterns: &[String], src: &Path, dest: &Path) -> Result<MoveReport, PackageError> {
  let mut report = MoveReport::default();

  for line in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
    let (dir, file_pattern) = match line.rsplit_once('/') {
      Some((dir, file)) => (dir, file),
      None => ("", line),
    };
    let from = src.join(dir);
    let to = dest.join(dir);

    if !from.exists() {
      report.missing.push(line.to_string());
      continue;
    }

    if file_pattern.is_empty() {
      for entry in WalkDir::new(&from).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file()
          && let Ok(relative) = entry.path().strip_prefix(src)
        {
          report.moved.push(relative.to_string_lossy().into_owned());
        }
      }
      if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| PackageError::io(parent, e))?;
      }
      fs::rename(&from, &to).map_err(|e| PackageError::io(&from, e))?;
      continue;
    }

    let regex = Regex::new(file_pattern).map_err(|source| PackageError::Pattern {
      pattern: line.to_string(),
      source,
    })?;
    fs::create_dir_all(&to).map_err(|e| PackageError::io(&to, e))?;

    let mut names: Vec<String> = fs::read_dir(&from)
      .map_err(|e| PackageError::io(&from, e))?
      .filter_map(Result::ok)
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .filter(|name| regex.is_match(name))
      .collect();
    names.sort();

    for name in names {
      fs::rename(from.join(&name), to.join(&name)).map_err(|e| PackageError::io(&from.join(&name), e))?;
      report.moved.push(if dir.is_empty() { name } else { format!("{dir}/{name}") });
    }
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn tree(root: &Path, files: &[&str]) {
    for file in files {
      let path = root.join(file);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, file).unwrap();
    }
  }

  #[test]
  fn moves_whole_directories_and_matching_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("app");
    let dest = temp.path().join("app/ignore_tmp");
    tree(&src, &["local/inputs.conf", "lookups/hosts.csv", "lookups/keep.txt", "default/app.conf"]);

    let patterns = vec!["local/".to_string(), r"lookups/.*\.csv".to_string(), "missing/".to_string()];
    let report = move_matching(&patterns, &src, &dest).unwrap();

    assert_eq!(report.moved, vec!["local/inputs.conf", "lookups/hosts.csv"]);
    assert_eq!(report.missing, vec!["missing/"]);
    assert!(!src.join("local").exists());
    assert!(dest.join("local/inputs.conf").is_file());
    assert!(dest.join("lookups/hosts.csv").is_file());
    assert!(src.join("lookups/keep.txt").is_file());
  }

  #[test]
  fn invalid_regex_is_reported() {
    let temp = TempDir::new().unwrap();
    tree(temp.path(), &["lookups/a.csv"]);
    let err = move_matching(&["lookups/(".to_string()], temp.path(), &temp.path().join("out")).unwrap_err();
    assert!(matches!(err, PackageError::Pattern { .. }));
  }
}
