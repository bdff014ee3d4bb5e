//! `[launcher] version` stamping in `app.conf`.

use crate::consts::DEFAULT_APP_VERSION;

const LAUNCHER_STANZA: &str = "launcher";
const VERSION_KEY: &str = "version";

fn stanza_name(line: &str) -> Option<&str> {
  let trimmed = line.trim();
  let inner = trimmed.strip_prefix('[')?;
  let end = inner.find(']')?;
  Some(inner[..end].trim())
}

fn version_value(line: &str) -> Option<&str> {
  let (key, value) = line.split_once('=')?;
  (key.trim().eq_ignore_ascii_case(VERSION_KEY)).then(|| value.trim())
}

/// Stamp `abbrev` onto the launcher version, adding the stanza or key when missing.
///
/// Returns the rewritten content and the version written.
pub fn stamp_launcher_version(content: &str, abbrev: &str) -> (String, String) {
  let mut in_launcher = false;
  let mut existing = None;
  for line in content.lines() {
    if let Some(name) = stanza_name(line) {
      in_launcher = name == LAUNCHER_STANZA;
    } else if in_launcher && existing.is_none() {
      existing = version_value(line);
    }
  }

  let version = if abbrev.is_empty() {
    DEFAULT_APP_VERSION.to_string()
  } else {
    format!("{}_{}", existing.unwrap_or(DEFAULT_APP_VERSION), abbrev)
  };
  let version_line = format!("{VERSION_KEY} = {version}");

  let mut out = Vec::new();
  let mut stamped = false;
  in_launcher = false;
  for line in content.lines() {
    if let Some(name) = stanza_name(line) {
      in_launcher = name == LAUNCHER_STANZA;
      out.push(line.to_string());
      if in_launcher && !stamped {
        out.push(version_line.clone());
        stamped = true;
      }
      continue;
    }
    if in_launcher && version_value(line).is_some() {
      continue;
    }
    out.push(line.to_string());
  }

  if !stamped {
    if !out.is_empty() {
      out.push(String::new());
    }
    out.push(format!("[{LAUNCHER_STANZA}]"));
    out.push(version_line);
  }

  let mut text = out.join("\n");
  text.push('\n');
  (text, version)
}

/// Drop every version key from the launcher stanza.
pub fn remove_launcher_version(content: &str) -> String {
  let mut in_launcher = false;
  let mut out = String::with_capacity(content.len());
  for line in content.lines() {
    if let Some(name) = stanza_name(line) {
      in_launcher = name == LAUNCHER_STANZA;
    } else if in_launcher && version_value(line).is_some() {
      continue;
    }
    out.push_str(line);
    out.push('\n');
  }
  out
}
