//! Host naming grammar.
//!
//! A format is literal text interleaved with fields:
//!
//! - `{class}`: one of the known host classes (longest match first)
//! - `{site}`: ASCII alphanumerics
//! - `{index}` or `{index:N}`: decimal digits, `N` fixes the zero-padded width
//!
//! `spl{class}{index:3}-{site}test` parses `splidx004-easttest` into class
//! `idx`, index 4, site `east`, and builds it back from those parts.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Site used when the format has no `{site}` field or for generated names.
pub const DEFAULT_SITE: &str = "0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
  #[error("unterminated field at byte {0} in host name format")]
  Unterminated(usize),

  #[error("unknown field '{{{0}}}' in host name format")]
  UnknownField(String),

  #[error("field '{0}' appears more than once in host name format")]
  DuplicateField(&'static str),

  #[error("host name format must contain a {{class}} field")]
  MissingClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Literal(String),
  Class,
  Site,
  Index { width: usize },
}

impl Token {
  fn field_name(&self) -> Option<&'static str> {
    match self {
      Token::Literal(_) => None,
      Token::Class => Some("class"),
      Token::Site => Some("site"),
      Token::Index { .. } => Some("index"),
    }
  }
}

/// Parts recovered from, or used to build, a host name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostName {
  pub app_class: String,
  pub site: String,
  pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNameFormat {
  raw: String,
  tokens: Vec<Token>,
}

impl FromStr for HostNameFormat {
  type Err = NamingError;

  fn from_str(raw: &str) -> Result<Self, Self::Err> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut rest = raw;
    let mut offset = 0;

    while let Some(open) = rest.find('{') {
      if open > 0 {
        tokens.push(Token::Literal(rest[..open].to_string()));
      }
      let close = rest[open..].find('}').ok_or(NamingError::Unterminated(offset + open))? + open;
      let field = rest[open + 1..close].trim();
      let token = match field.split_once(':') {
        None if field == "class" => Token::Class,
        None if field == "site" => Token::Site,
        None if field == "index" => Token::Index { width: 0 },
        Some(("index", width)) => Token::Index {
          width: width
            .trim()
            .parse()
            .map_err(|_| NamingError::UnknownField(field.to_string()))?,
        },
        _ => return Err(NamingError::UnknownField(field.to_string())),
      };
      if let Some(name) = token.field_name()
        && tokens.iter().any(|t| t.field_name() == Some(name))
      {
        return Err(NamingError::DuplicateField(name));
      }
      tokens.push(token);
      offset += close + 1;
      rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
      tokens.push(Token::Literal(rest.to_string()));
    }

    if !tokens.contains(&Token::Class) {
      return Err(NamingError::MissingClass);
    }

    Ok(Self {
      raw: raw.to_string(),
      tokens,
    })
  }
}

impl fmt::Display for HostNameFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

#[derive(Default)]
struct Captures {
  class: Option<String>,
  site: Option<String>,
  index: Option<u32>,
}

impl HostNameFormat {
  /// Parse `hostname` against the format. The class must be one of `known_classes`.
  pub fn parse(&self, hostname: &str, known_classes: &[String]) -> Option<HostName> {
    let mut classes: Vec<&str> = known_classes.iter().map(String::as_str).filter(|c| !c.is_empty()).collect();
    classes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    classes.dedup();

    let mut captures = Captures::default();
    if !self.match_from(0, hostname, &classes, &mut captures) {
      return None;
    }

    Some(HostName {
      app_class: captures.class?,
      site: captures.site.unwrap_or_else(|| DEFAULT_SITE.to_string()),
      index: captures.index.unwrap_or(1),
    })
  }

  fn match_from(&self, token_idx: usize, rest: &str, classes: &[&str], caps: &mut Captures) -> bool {
    let Some(token) = self.tokens.get(token_idx) else {
      return rest.is_empty();
    };
    let next = token_idx + 1;

    match token {
      Token::Literal(lit) => rest
        .strip_prefix(lit.as_str())
        .is_some_and(|remaining| self.match_from(next, remaining, classes, caps)),
      Token::Class => {
        for class in classes {
          if let Some(remaining) = rest.strip_prefix(class) {
            caps.class = Some((*class).to_string());
            if self.match_from(next, remaining, classes, caps) {
              return true;
            }
          }
        }
        caps.class = None;
        false
      }
      Token::Site => {
        let max = rest.bytes().take_while(u8::is_ascii_alphanumeric).count();
        for end in (1..=max).rev() {
          caps.site = Some(rest[..end].to_string());
          if self.match_from(next, &rest[end..], classes, caps) {
            return true;
          }
        }
        caps.site = None;
        false
      }
      Token::Index { width } => {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let candidates: Vec<usize> = if *width > 0 {
          if digits >= *width { vec![*width] } else { vec![] }
        } else {
          (1..=digits).rev().collect()
        };
        for end in candidates {
          let Ok(index) = rest[..end].parse::<u32>() else {
            continue;
          };
          caps.index = Some(index);
          if self.match_from(next, &rest[end..], classes, caps) {
            return true;
          }
        }
        caps.index = None;
        false
      }
    }
  }

  /// Build a host name from its parts.
  pub fn build(&self, app_class: &str, site: &str, index: u32) -> String {
    let mut name = String::new();
    for token in &self.tokens {
      match token {
        Token::Literal(lit) => name.push_str(lit),
        Token::Class => name.push_str(app_class),
        Token::Site => name.push_str(site),
        Token::Index { width } => name.push_str(&format!("{:0width$}", index, width = *width)),
      }
    }
    name
  }

  /// Cheap check that `hostname` carries the format's literal prefix and suffix.
  pub fn matches_affixes(&self, hostname: &str) -> bool {
    let prefix = match self.tokens.first() {
      Some(Token::Literal(lit)) => lit.as_str(),
      _ => "",
    };
    let suffix = match self.tokens.last() {
      Some(Token::Literal(lit)) if self.tokens.len() > 1 => lit.as_str(),
      _ => "",
    };
    hostname.len() >= prefix.len() + suffix.len() && hostname.starts_with(prefix) && hostname.ends_with(suffix)
  }
}
