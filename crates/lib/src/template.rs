//! Minimal string templating over JSON values.
//!
//! Placeholders take the form `{{ dotted.path }}`. Each path segment selects an
//! object key, or an array index when the segment is numeric. A placeholder that
//! does not resolve is an error rather than an empty string.
//!
//! ```text
//! "{{ host.site }}-{{ ports.0 }}"  with  {"host": {"site": "east"}, "ports": [8089]}
//!   => "east-8089"
//! ```

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("unterminated placeholder starting at byte {0}")]
  Unterminated(usize),

  #[error("empty placeholder at byte {0}")]
  Empty(usize),

  #[error("invalid placeholder '{0}'")]
  InvalidPath(String),

  #[error("template variable '{0}' is not bound")]
  Unbound(String),

  #[error("failed to read template values '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse template values '{path}': {message}")]
  Parse { path: PathBuf, message: String },

  #[error("template values in '{0}' must be a mapping")]
  NotAMapping(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
  Literal(&'a str),
  Variable(&'a str),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
  let mut segments = Vec::new();
  let mut rest = template;
  let mut offset = 0;

  while let Some(start) = rest.find("{{") {
    if start > 0 {
      segments.push(Segment::Literal(&rest[..start]));
    }
    let after_open = &rest[start + 2..];
    let end = after_open
      .find("}}")
      .ok_or(TemplateError::Unterminated(offset + start))?;
    let path = after_open[..end].trim();
    if path.is_empty() {
      return Err(TemplateError::Empty(offset + start));
    }
    if path
      .split('.')
      .any(|seg| seg.is_empty() || !seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-'))
    {
      return Err(TemplateError::InvalidPath(path.to_string()));
    }
    segments.push(Segment::Variable(path));

    let consumed = start + 2 + end + 2;
    offset += consumed;
    rest = &rest[consumed..];
  }

  if !rest.is_empty() {
    segments.push(Segment::Literal(rest));
  }

  Ok(segments)
}

fn lookup<'v>(bindings: &'v Value, path: &str) -> Option<&'v Value> {
  path.split('.').try_fold(bindings, |value, segment| match value {
    Value::Object(map) => map.get(segment),
    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

fn value_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    other => other.to_string(),
  }
}

/// Render `template` against `bindings`.
pub fn render(template: &str, bindings: &Value) -> Result<String, TemplateError> {
  let mut out = String::with_capacity(template.len());
  for segment in parse(template)? {
    match segment {
      Segment::Literal(text) => out.push_str(text),
      Segment::Variable(path) => {
        let value = lookup(bindings, path).ok_or_else(|| TemplateError::Unbound(path.to_string()))?;
        out.push_str(&value_to_string(value));
      }
    }
  }
  Ok(out)
}

/// Whether `text` contains any placeholder at all.
pub fn has_placeholders(text: &str) -> bool {
  text.contains("{{")
}

/// Variables referenced by `template`, in order of first appearance.
pub fn variables(template: &str) -> Result<Vec<String>, TemplateError> {
  let mut vars: Vec<String> = Vec::new();
  for segment in parse(template)? {
    if let Segment::Variable(path) = segment
      && !vars.iter().any(|v| v == path)
    {
      vars.push(path.to_string());
    }
  }
  Ok(vars)
}

/// Shallow-merge mappings left to right; later layers win per top-level key.
pub fn merge(layers: &[&Value]) -> Value {
  let mut merged = Map::new();
  for layer in layers {
    if let Value::Object(map) = layer {
      for (key, value) in map {
        merged.insert(key.clone(), value.clone());
      }
    }
  }
  Value::Object(merged)
}

/// Load template values from JSON or YAML files and merge them in order.
///
/// `.yml`/`.yaml` files are read as YAML, everything else as JSON.
pub fn load_value_files(paths: &[PathBuf]) -> Result<Value, TemplateError> {
  let mut loaded = Vec::with_capacity(paths.len());
  for path in paths {
    loaded.push(load_value_file(path)?);
  }
  let refs: Vec<&Value> = loaded.iter().collect();
  Ok(merge(&refs))
}

fn load_value_file(path: &Path) -> Result<Value, TemplateError> {
  let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let is_yaml = matches!(
    path.extension().and_then(|e| e.to_str()),
    Some("yml") | Some("yaml")
  );

  let value: Value = if is_yaml {
    serde_yaml::from_str(&text).map_err(|e| TemplateError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?
  } else {
    serde_json::from_str(&text).map_err(|e| TemplateError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?
  };

  if !value.is_object() {
    return Err(TemplateError::NotAMapping(path.to_path_buf()));
  }
  Ok(value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::TempDir;

  #[test]
  fn renders_nested_paths_and_indexes() {
    let bindings = json!({"host": {"site": "east", "index": 3}, "ports": [8089, 9997]});
    let out = render("{{ host.site }}-{{host.index}}:{{ ports.1 }}", &bindings).unwrap();
    assert_eq!(out, "east-3:9997");
  }

  #[test]
  fn text_without_placeholders_passes_through() {
    assert_eq!(render("plain { text }", &json!({})).unwrap(), "plain { text }");
  }

  #[test]
  fn unbound_variable_is_an_error() {
    let err = render("{{ secrets.admin }}", &json!({"secrets": {}})).unwrap_err();
    assert!(matches!(err, TemplateError::Unbound(ref v) if v == "secrets.admin"));
  }

  #[test]
  fn unterminated_placeholder_reports_offset() {
    let err = render("abc {{ open", &json!({})).unwrap_err();
    assert!(matches!(err, TemplateError::Unterminated(4)));
  }

  #[test]
  fn rejects_expressions() {
    let err = render("{{ a | upper }}", &json!({"a": "x"})).unwrap_err();
    assert!(matches!(err, TemplateError::InvalidPath(_)));
  }

  #[test]
  fn variables_are_deduplicated_in_order() {
    let vars = variables("{{ b }} {{ a.x }} {{ b }}").unwrap();
    assert_eq!(vars, vec!["b".to_string(), "a.x".to_string()]);
  }

  #[test]
  fn merge_later_layers_win() {
    let merged = merge(&[&json!({"a": 1, "b": 1}), &json!({"b": 2}), &json!("ignored")]);
    assert_eq!(merged, json!({"a": 1, "b": 2}));
  }

  #[test]
  fn loads_json_and_yaml_files() {
    let temp = TempDir::new().unwrap();
    let json_path = temp.path().join("base.json");
    let yaml_path = temp.path().join("override.yml");
    std::fs::write(&json_path, r#"{"env": "stage", "region": "us"}"#).unwrap();
    std::fs::write(&yaml_path, "env: prod\n").unwrap();

    let values = load_value_files(&[json_path, yaml_path]).unwrap();
    assert_eq!(values, json!({"env": "prod", "region": "us"}));
  }

  #[test]
  fn non_mapping_value_file_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("list.json");
    std::fs::write(&path, "[1, 2]").unwrap();
    assert!(matches!(
      load_value_files(&[path]).unwrap_err(),
      TemplateError::NotAMapping(_)
    ));
  }
}
