use super::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
  name: String,
  entries: Vec<(String, Option<String>)>,
}

impl IniSection {
  fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      entries: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Entries in file order. Bare keys carry `None`.
  pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.entries.iter().any(|(k, _)| k == key)
  }

  /// Raw value of `key`, or `None` when absent or bare.
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .entries
      .iter()
      .find(|(k, _)| k == key)
      .and_then(|(_, v)| v.as_deref())
  }

  /// Value of `key` with one layer of surrounding quotes removed.
  pub fn get_unquoted(&self, key: &str) -> Option<&str> {
    self.get(key).map(unquote)
  }

  pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
    match self.get(key) {
      None => Ok(None),
      Some(raw) => parse_bool(unquote(raw)).map(Some).ok_or_else(|| ConfigError::InvalidBool {
        section: self.name.clone(),
        key: key.to_string(),
        value: raw.to_string(),
      }),
    }
  }

  fn set(&mut self, key: String, value: Option<String>) {
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some(existing) => existing.1 = value,
      None => self.entries.push((key, value)),
    }
  }

  fn append_continuation(&mut self, text: &str) -> bool {
    match self.entries.last_mut() {
      Some((_, Some(value))) => {
        value.push('\n');
        value.push_str(text);
        true
      }
      _ => false,
    }
  }
}

/// A parsed configuration file. Repeated sections merge; repeated keys keep the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
  sections: Vec<IniSection>,
}

impl IniDocument {
  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    Self::parse_named(text, "<inline>")
  }

  pub(crate) fn parse_named(text: &str, origin: &str) -> Result<Self, ConfigError> {
    let mut doc = IniDocument::default();
    let mut current: Option<usize> = None;

    for (idx, raw_line) in text.lines().enumerate() {
      let line_no = idx + 1;
      let syntax = |message: &str| ConfigError::Syntax {
        path: origin.to_string(),
        line: line_no,
        message: message.to_string(),
      };

      if raw_line.trim().is_empty() {
        continue;
      }

      let trimmed_start = raw_line.trim_start();
      if trimmed_start.starts_with('#') || trimmed_start.starts_with(';') {
        continue;
      }

      let indented = raw_line.starts_with(' ') || raw_line.starts_with('\t');
      if indented {
        let section = current.ok_or_else(|| syntax("continuation line outside of a section"))?;
        if !doc.sections[section].append_continuation(raw_line.trim()) {
          return Err(syntax("continuation line without a preceding value"));
        }
        continue;
      }

      let line = raw_line.trim();
      if let Some(rest) = line.strip_prefix('[') {
        let name = rest
          .strip_suffix(']')
          .ok_or_else(|| syntax("unterminated section header"))?
          .trim();
        if name.is_empty() {
          return Err(syntax("empty section name"));
        }
        current = Some(doc.section_index_or_insert(name));
        continue;
      }

      let section = current.ok_or_else(|| syntax("entry before the first section header"))?;
      let (key, value) = split_entry(line);
      if key.is_empty() {
        return Err(syntax("entry without a key"));
      }
      doc.sections[section].set(key.to_string(), value.map(str::to_string));
    }

    Ok(doc)
  }

  fn section_index_or_insert(&mut self, name: &str) -> usize {
    if let Some(idx) = self.sections.iter().position(|s| s.name == name) {
      return idx;
    }
    self.sections.push(IniSection::new(name));
    self.sections.len() - 1
  }

  pub fn sections(&self) -> impl Iterator<Item = &IniSection> {
    self.sections.iter()
  }

  pub fn section(&self, name: &str) -> Option<&IniSection> {
    self.sections.iter().find(|s| s.name == name)
  }

  pub fn is_empty(&self) -> bool {
    self.sections.is_empty()
  }
}

fn split_entry(line: &str) -> (&str, Option<&str>) {
  let split_at = line.find(['=', ':']);
  match split_at {
    Some(pos) => (line[..pos].trim(), Some(line[pos + 1..].trim())),
    None => (line.trim(), None),
  }
}

/// Parse the boolean spellings accepted in configuration files.
pub fn parse_bool(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "yes" | "true" | "on" => Some(true),
    "0" | "no" | "false" | "off" => Some(false),
    _ => None,
  }
}

/// Strip one layer of matching single or double quotes.
pub fn unquote(value: &str) -> &str {
  let value = value.trim();
  for quote in ['"', '\''] {
    if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
      return &value[1..value.len() - 1];
    }
  }
  value
}

#[cfg(test)]
mod tests {
  use super::*;

  const METHODS: &str = r#"
# deployment methods
[default]
app_name_filter = ^(TA-|SA-)
install_inclusion_file = .inclusions

[search]
path = etc/apps
update_method: copy
delete_first = true
restart_command = "restart"
install_ignore = local;lookups/.*\.csv

[bare]
allow_missing
"#;

  #[test]
  fn parses_sections_and_entries_in_order() {
    let doc = IniDocument::parse(METHODS).unwrap();
    let names: Vec<_> = doc.sections().map(|s| s.name()).collect();
    assert_eq!(names, vec!["default", "search", "bare"]);

    let search = doc.section("search").unwrap();
    let keys: Vec<_> = search.entries().map(|(k, _)| k).collect();
    assert_eq!(
      keys,
      vec!["path", "update_method", "delete_first", "restart_command", "install_ignore"]
    );
    assert_eq!(search.get("update_method"), Some("copy"));
    assert_eq!(search.get_unquoted("restart_command"), Some("restart"));
    assert_eq!(search.get_bool("delete_first").unwrap(), Some(true));
    assert_eq!(search.get_bool("restart").unwrap(), None);
  }

  #[test]
  fn bare_keys_have_no_value() {
    let doc = IniDocument::parse(METHODS).unwrap();
    let bare = doc.section("bare").unwrap();
    assert!(bare.contains_key("allow_missing"));
    assert_eq!(bare.get("allow_missing"), None);
  }

  #[test]
  fn continuation_lines_join_with_newline() {
    let doc = IniDocument::parse("[s]\nbanner = first\n  second\n").unwrap();
    assert_eq!(doc.section("s").unwrap().get("banner"), Some("first\nsecond"));
  }

  #[test]
  fn repeated_sections_merge_and_last_key_wins() {
    let doc = IniDocument::parse("[a]\nx = 1\n[b]\n[a]\nx = 2\ny = 3\n").unwrap();
    let a = doc.section("a").unwrap();
    assert_eq!(a.get("x"), Some("2"));
    assert_eq!(a.get("y"), Some("3"));
    assert_eq!(doc.sections().count(), 2);
  }

  #[test]
  fn entry_before_section_is_rejected() {
    let err = IniDocument::parse("x = 1\n[a]\n").unwrap_err();
    assert!(matches!(err, ConfigError::Syntax { line: 1, .. }));
  }

  #[test]
  fn invalid_bool_names_section_and_key() {
    let doc = IniDocument::parse("[cmd]\nuse_root = maybe\n").unwrap();
    let err = doc.section("cmd").unwrap().get_bool("use_root").unwrap_err();
    assert_eq!(err.to_string(), "[cmd] use_root: 'maybe' is not a boolean");
  }

  #[test]
  fn unquote_strips_one_layer() {
    assert_eq!(unquote("\"a\""), "a");
    assert_eq!(unquote("'a'"), "a");
    assert_eq!(unquote("\"'a'\""), "'a'");
    assert_eq!(unquote("\""), "\"");
  }
}
